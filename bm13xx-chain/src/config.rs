//! Chain configuration.
//!
//! Parses environment variables describing the chain hardware.

/// Default oscillator feeding the chips' PLLs.
pub const DEFAULT_CLOCK_HZ: u32 = 25_000_000;

/// Default address stride between neighbouring chips.
pub const DEFAULT_ADDRESS_INCREMENT: u8 = 4;

/// Static description of one chain of chips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Frames carry the two byte preamble (`55 aa` out, `aa 55` in).
    ///
    /// Chip generations differ here; BM1397 and later expect it.
    pub preamble: bool,

    /// Nominal input clock in Hz, used for PLL and baud rate math.
    pub clock_hz: u32,

    /// Address stride used when assigning addresses during init.
    pub address_increment: u8,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            preamble: true,
            clock_hz: DEFAULT_CLOCK_HZ,
            address_increment: DEFAULT_ADDRESS_INCREMENT,
        }
    }
}

impl ChainConfig {
    /// Parse configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `BM13XX_PREAMBLE`: `0`/`false`/`no`/`off` disables the preamble (default: on)
    /// - `BM13XX_CLOCK_HZ`: input clock in Hz (default: 25000000)
    /// - `BM13XX_ADDRESS_INCREMENT`: address stride (default: 4)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let preamble = std::env::var("BM13XX_PREAMBLE")
            .ok()
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.preamble);

        let clock_hz = std::env::var("BM13XX_CLOCK_HZ")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.clock_hz);

        let address_increment = std::env::var("BM13XX_ADDRESS_INCREMENT")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.address_increment);

        Self {
            preamble,
            clock_hz,
            address_increment,
        }
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("BM13XX_PREAMBLE");
        std::env::remove_var("BM13XX_CLOCK_HZ");
        std::env::remove_var("BM13XX_ADDRESS_INCREMENT");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_when_not_set() {
        clear_env();

        assert_eq!(ChainConfig::from_env(), ChainConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_every_variable() {
        clear_env();
        std::env::set_var("BM13XX_PREAMBLE", "off");
        std::env::set_var("BM13XX_CLOCK_HZ", "50000000");
        std::env::set_var("BM13XX_ADDRESS_INCREMENT", "2");

        let config = ChainConfig::from_env();
        assert!(!config.preamble);
        assert_eq!(config.clock_hz, 50_000_000);
        assert_eq!(config.address_increment, 2);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_garbage_falls_back_to_defaults() {
        clear_env();
        std::env::set_var("BM13XX_PREAMBLE", "maybe");
        std::env::set_var("BM13XX_CLOCK_HZ", "fast");
        // Does not fit the 8-bit address space
        std::env::set_var("BM13XX_ADDRESS_INCREMENT", "256");

        assert_eq!(ChainConfig::from_env(), ChainConfig::default());

        clear_env();
    }
}
