//! Enumerate a BM13xx chain over a serial port and dump its registers.

mod output;

use anyhow::{Context, Result};
use bm13xx_chain::bm13xx::Chain;
use bm13xx_chain::ChainConfig;
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

/// Give the chips this long on the new UART divider before the host
/// switches rate.
const BAUD_SWITCH_SETTLE: Duration = Duration::from_millis(50);

/// Register probe for BM13xx mining ASIC chains
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port the chain is attached to, e.g. /dev/ttyUSB0
    #[arg(short, long)]
    port: String,

    /// Baud rate the chips are currently listening at
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Address stride between chips (overrides BM13XX_ADDRESS_INCREMENT)
    #[arg(short, long)]
    increment: Option<u8>,

    /// Chips expect frames without the 55 aa preamble
    #[arg(long)]
    no_preamble: bool,

    /// Chip input clock in Hz (overrides BM13XX_CLOCK_HZ)
    #[arg(long)]
    clock_hz: Option<u32>,

    /// Switch the chain to this baud rate once the registers are read
    #[arg(long)]
    target_baud: Option<u32>,

    /// Also read the core registers of this core on every chip
    #[arg(long)]
    dump_core: Option<u16>,

    /// Serial read timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,
}

impl Args {
    fn chain_config(&self) -> ChainConfig {
        let mut config = ChainConfig::from_env();
        if self.no_preamble {
            config.preamble = false;
        }
        if let Some(clock_hz) = self.clock_hz {
            config.clock_hz = clock_hz;
        }
        if let Some(increment) = self.increment {
            config.address_increment = increment;
        }
        config
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    bm13xx_chain::tracing::init_stdout();

    let config = args.chain_config();
    let port = tokio_serial::new(&args.port, args.baud)
        .timeout(Duration::from_millis(args.timeout_ms))
        .open()
        .with_context(|| format!("Failed to open serial port {}", args.port))?;

    let mut chain = Chain::new(port, &config);
    chain
        .init(config.address_increment)
        .context("Failed to enumerate chain")?;

    for index in 0..chain.chips().len() {
        chain
            .read_all_registers(index)
            .with_context(|| format!("Failed to read registers of chip {}", index))?;

        let report = chain.read_unknown_registers(index)?;
        if !report.is_complete() {
            warn!(
                chip = index,
                skipped = report.failed.len(),
                "Some undocumented registers did not answer"
            );
        }
    }

    if let Some(core_id) = args.dump_core {
        let addresses: Vec<u8> = chain.chips().iter().map(|chip| chip.address()).collect();
        for address in addresses {
            match chain.read_all_core_registers(address, core_id) {
                Ok(report) if !report.is_complete() => warn!(
                    chip = address,
                    core = core_id,
                    skipped = report.failed.len(),
                    "Some core registers did not answer"
                ),
                Ok(_) => {}
                Err(err) => warn!(chip = address, core = core_id, error = %err, "Core dump skipped"),
            }
        }
    }

    if let Some(target) = args.target_baud {
        chain
            .set_baudrate(target)
            .with_context(|| format!("Failed to set chain baud rate to {}", target))?;
        std::thread::sleep(BAUD_SWITCH_SETTLE);
        chain
            .transport_mut()
            .set_baud_rate(target)
            .with_context(|| format!("Failed to switch {} to {} baud", args.port, target))?;
        info!(baud = target, "Host baud rate switched");
    }

    print!(
        "{}",
        output::ChainReport {
            chips: chain.chips(),
            clock_hz: config.clock_hz,
        }
    );

    Ok(())
}
