//! Text report of what the probe learned about each chip.

use bm13xx_chain::bm13xx::register::PLL_PARAMETERS;
use bm13xx_chain::bm13xx::{Chip, Error};
use std::fmt;

/// Every chip's cached registers, PLL outputs and core registers.
pub struct ChainReport<'a> {
    pub chips: &'a [Chip],
    pub clock_hz: u32,
}

impl fmt::Display for ChainReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, chip) in self.chips.iter().enumerate() {
            format_chip(f, index, chip, self.clock_hz)?;
        }
        Ok(())
    }
}

fn format_chip(f: &mut fmt::Formatter<'_>, index: usize, chip: &Chip, clock_hz: u32) -> fmt::Result {
    writeln!(
        f,
        "chip {} @ 0x{:02x}: {}, {} cores",
        index,
        chip.address(),
        chip.chip_type(),
        chip.core_count()
    )?;

    for (register, value) in chip.registers() {
        writeln!(
            f,
            "  {:<32} 0x{:02x}  0x{:08x}",
            format!("{:?}", register),
            u8::from(register),
            value
        )?;
    }

    for pll in 0..PLL_PARAMETERS.len() {
        match chip.pll_frequency(pll, clock_hz) {
            Ok(hz) => writeln!(f, "  PLL{} {:>10.3} MHz", pll, f64::from(hz) / 1e6)?,
            Err(Error::RegisterNotCached(_)) => {}
            Err(err) => writeln!(f, "  PLL{} {}", pll, err)?,
        }
    }

    for (register, value) in chip.core_registers() {
        writeln!(f, "  core {:<27} 0x{:04x}", format!("{:?}", register), value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_discovered_chip() {
        let chips = [Chip::new(0x1397_1804)];
        let text = ChainReport {
            chips: &chips,
            clock_hz: 25_000_000,
        }
        .to_string();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("chip 0 @ 0x04: BM1397, 24 cores"));
        assert_eq!(
            lines.next(),
            Some(format!("  {:<32} 0x00  0x13971804", "ChipAddress").as_str())
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn unknown_chip_type() {
        let chips = [Chip::new(0x1234_0000), Chip::new(0x1234_0004)];
        let text = ChainReport {
            chips: &chips,
            clock_hz: 25_000_000,
        }
        .to_string();
        assert!(text.contains("chip 1 @ 0x04: unknown (1234), 0 cores"));
    }
}
