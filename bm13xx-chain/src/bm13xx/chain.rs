//! Chain controller.
//!
//! A chain is every chip hanging off one half-duplex UART. The controller
//! owns the transport and serializes all traffic on it: each operation writes
//! one frame and, where the chips answer, reads exactly one response before
//! the next frame goes out.
//!
//! Chips come up unaddressed. [`Chain::init`] discovers them, assigns bus
//! addresses in physical order and runs the clock and ticket setup the chips
//! need before they accept work.

use std::io::ErrorKind;
use std::time::Duration;

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use super::chip::Chip;
use super::error::{Error, FramingFault, Result};
use super::protocol::{decode_response, Command, FrameCodec, Job, Response};
use super::register::{
    core_control, misc_control_with_baud_divider, CoreRegister, CoreRegisterResponse,
    PllParameter, RegisterAddress, ALL_CORE_REGISTERS, ALL_REGISTERS, UNDOCUMENTED_REGISTERS,
};
use crate::config::ChainConfig;
use crate::hw_trait::{Delay, SerialBus, StdDelay};
use crate::tracing::prelude::*;

/// Slowest UART rate the chips support.
pub const MIN_BAUD: u32 = 115_200;
/// Fastest UART rate the chips support.
pub const MAX_BAUD: u32 = 7_000_000;
/// Above this rate the UART is clocked from PLL3 instead of the oscillator.
pub const HIGH_SPEED_BAUD: u32 = 3_000_000;

/// PLL3 setting used to clock the fast UART: fbdiv 112, all dividers 1.
const PLL3_HIGH_SPEED: u32 = 0xc070_0111;
/// Fast UART configuration matching [`PLL3_HIGH_SPEED`]. PLL3_DIV4 sits in
/// bits 27:24.
const FAST_UART_HIGH_SPEED: u32 = 0x0600_000f;

/// Largest baud divider the `MiscControl` BT8D field can hold.
const MAX_BAUD_DIVIDER: u32 = 0x1ff;

/// Number of addresses on the bus.
const ADDRESS_SPACE: usize = 256;

/// Largest `chips * increment` an address assignment may span.
const MAX_ADDRESS_SPAN: usize = 0xff;

const CHAIN_INACTIVE_REPEATS: usize = 3;
/// Settle after every addressing command.
const COMMAND_SETTLE: Duration = Duration::from_millis(30);
/// Extra settle between addressing steps during init.
const STEP_SETTLE: Duration = Duration::from_millis(30);
/// Settle once every chip has its address.
const ADDRESSING_SETTLE: Duration = Duration::from_millis(120);

/// One broadcast register write of the init sequence.
struct InitStep {
    register: RegisterAddress,
    value: u32,
    settle: Duration,
}

/// Clock and ticket setup run after addressing. Order and settle times
/// matter; chips go unresponsive if they are rushed.
const INIT_SEQUENCE: [InitStep; 7] = [
    InitStep {
        register: RegisterAddress::ClockOrderControl0,
        value: 0,
        settle: Duration::ZERO,
    },
    InitStep {
        register: RegisterAddress::ClockOrderControl1,
        value: 0,
        settle: Duration::from_millis(100),
    },
    InitStep {
        register: RegisterAddress::OrderedClockEnable,
        value: 0,
        settle: Duration::from_millis(100),
    },
    InitStep {
        register: RegisterAddress::OrderedClockEnable,
        value: 0xff,
        settle: Duration::from_millis(10),
    },
    // Clock delay control 0xb4 on all cores
    InitStep {
        register: RegisterAddress::CoreRegisterControl,
        value: 0x8000_80b4,
        settle: Duration::from_millis(5),
    },
    InitStep {
        register: RegisterAddress::TicketMask,
        value: 0xfc,
        settle: Duration::from_millis(10),
    },
    InitStep {
        register: RegisterAddress::MiscControl,
        value: 0x2001,
        settle: Duration::from_millis(100),
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No chips known; [`Chain::init`] has not run or failed.
    Unconfigured,
    /// Chips discovered, addressed and initialized.
    Ready,
}

/// Outcome of a best-effort scan.
#[derive(Debug)]
pub struct ScanReport<K> {
    /// Items read and cached.
    pub read: Vec<K>,
    /// Items skipped, with the reason.
    pub failed: Vec<(K, Error)>,
}

impl<K> ScanReport<K> {
    fn new() -> Self {
        Self {
            read: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Chain<T, D = StdDelay> {
    transport: T,
    delay: D,
    codec: FrameCodec,
    clock_hz: u32,
    chips: Vec<Chip>,
    state: ChainState,
}

impl<T: SerialBus> Chain<T, StdDelay> {
    pub fn new(transport: T, config: &ChainConfig) -> Self {
        Self::with_delay(transport, StdDelay, config)
    }
}

impl<T: SerialBus, D: Delay> Chain<T, D> {
    pub fn with_delay(transport: T, delay: D, config: &ChainConfig) -> Self {
        Self {
            transport,
            delay,
            codec: FrameCodec::new(config.preamble),
            clock_hz: config.clock_hz,
            chips: Vec::new(),
            state: ChainState::Unconfigured,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Nominal input clock in Hz.
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Chips in discovery order, which is their physical order on the bus.
    pub fn chips(&self) -> &[Chip] {
        &self.chips
    }

    pub fn chip(&self, index: usize) -> Option<&Chip> {
        self.chips.get(index)
    }

    /// Index of the chip holding bus address `address`.
    pub fn chip_index(&self, address: u8) -> Result<usize> {
        self.chips
            .iter()
            .position(|chip| chip.address() == address)
            .ok_or(Error::NotFound(address))
    }

    /// The underlying transport, e.g. to change the host side baud rate
    /// after [`Chain::set_baudrate`].
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn checked_index(&self, index: usize) -> Result<usize> {
        if index < self.chips.len() {
            Ok(index)
        } else {
            Err(Error::range("chip index", index as u64, self.chips.len() as u64))
        }
    }

    fn send(&mut self, command: Command) -> Result<()> {
        let mut frame = BytesMut::new();
        self.codec.encode(command, &mut frame)?;
        self.transport.write_all(&frame)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Read one response frame.
    ///
    /// Reads until a full frame has arrived. A timeout with nothing received
    /// surfaces as the transport's timeout error; a timeout or end of stream
    /// part way through is a framing error.
    fn receive(&mut self) -> Result<Response> {
        let expected = self.codec.response_len();
        let mut buf = vec![0u8; expected];
        let mut filled = 0;

        while filled < expected {
            match self.transport.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut && filled > 0 => break,
                Err(e) => return Err(e.into()),
            }
        }

        decode_response(&mut self.codec, &buf[..filled])
    }

    fn settle(&mut self, duration: Duration) {
        if !duration.is_zero() {
            self.delay.delay(duration);
        }
    }

    /// Discover, address and initialize every chip on the chain.
    ///
    /// Chips get addresses `0, increment, 2 * increment, ...` in physical
    /// order. On failure the chain is left unconfigured with no chips.
    pub fn init(&mut self, increment: u8) -> Result<()> {
        if self.state == ChainState::Ready || !self.chips.is_empty() {
            return Err(Error::AlreadyConfigured);
        }
        if increment == 0 {
            return Err(Error::Configuration(
                "address increment must be non-zero".into(),
            ));
        }

        match self.enumerate(increment) {
            Ok(()) => {
                self.state = ChainState::Ready;
                info!(chips = self.chips.len(), "Chain ready");
                Ok(())
            }
            Err(err) => {
                self.chips.clear();
                Err(err)
            }
        }
    }

    fn enumerate(&mut self, increment: u8) -> Result<()> {
        self.discover()?;

        let count = self.chips.len();
        if count == 0 {
            return Err(Error::NoChips);
        }
        let span = count * usize::from(increment);
        if span > MAX_ADDRESS_SPAN {
            return Err(Error::Configuration(format!(
                "{} chips at address increment {} span {} addresses, beyond 0xff",
                count, increment, span
            )));
        }

        for _ in 0..CHAIN_INACTIVE_REPEATS {
            self.chain_inactive()?;
            self.settle(STEP_SETTLE);
        }

        for index in 0..count {
            // Fits: span checked above
            let address = (index * usize::from(increment)) as u8;
            self.set_chip_address(address)?;
            self.chips[index].set_address(address);
            debug!(index, address, "Assigned chip address");
            self.settle(STEP_SETTLE);
        }
        self.settle(ADDRESSING_SETTLE);

        for step in &INIT_SEQUENCE {
            debug!(register = ?step.register, value = step.value, "Init write");
            self.write_register(true, 0, step.register, step.value)?;
            self.settle(step.settle);
        }

        Ok(())
    }

    fn discover(&mut self) -> Result<()> {
        self.send(Command::ReadRegister {
            broadcast: true,
            chip_address: 0,
            register_address: RegisterAddress::ChipAddress,
        })?;

        loop {
            let response = match self.receive() {
                Ok(response) => response,
                Err(err) if err.is_timeout() => break,
                Err(Error::Framing(FramingFault::Length { actual: 0, .. })) => break,
                Err(err) => return Err(err),
            };

            if response.register_address != u8::from(RegisterAddress::ChipAddress) {
                return Err(Error::mismatch(
                    "register address",
                    RegisterAddress::ChipAddress as u8,
                    response.register_address,
                ));
            }
            if response.chip_address != 0 {
                return Err(Error::mismatch("chip address", 0u8, response.chip_address));
            }
            if self.chips.len() == ADDRESS_SPACE {
                return Err(Error::Configuration(
                    "more chips answered than the bus can address".into(),
                ));
            }

            let chip = Chip::new(response.value);
            info!(
                index = self.chips.len(),
                chip_type = %chip.chip_type(),
                cores = chip.core_count(),
                "Discovered chip"
            );
            self.chips.push(chip);
        }

        Ok(())
    }

    /// Broadcast `ChainInactive`, returning every chip to address 0.
    pub fn chain_inactive(&mut self) -> Result<()> {
        self.send(Command::ChainInactive)?;
        self.settle(COMMAND_SETTLE);
        Ok(())
    }

    /// Give the first still-unaddressed chip the bus address `address`.
    pub fn set_chip_address(&mut self, address: u8) -> Result<()> {
        self.send(Command::SetChipAddress {
            chip_address: address,
        })?;
        self.settle(COMMAND_SETTLE);
        Ok(())
    }

    /// Read one register of the chip at `chip_index` and cache it.
    pub fn read_register(&mut self, chip_index: usize, register: RegisterAddress) -> Result<u32> {
        let index = self.checked_index(chip_index)?;
        let address = self.chips[index].address();

        self.send(Command::ReadRegister {
            broadcast: false,
            chip_address: address,
            register_address: register,
        })?;
        let response = self.receive()?;

        if response.chip_address != address {
            return Err(Error::mismatch("chip address", address, response.chip_address));
        }
        if response.register_address != u8::from(register) {
            return Err(Error::mismatch(
                "register address",
                u8::from(register),
                response.register_address,
            ));
        }

        self.chips[index].store_register(register, response.value);
        Ok(response.value)
    }

    /// Write a register on one chip, or on every chip when `broadcast`.
    ///
    /// Cached copies of the register are updated; registers never read stay
    /// uncached.
    pub fn write_register(
        &mut self,
        broadcast: bool,
        chip_address: u8,
        register: RegisterAddress,
        value: u32,
    ) -> Result<()> {
        let target = if broadcast {
            None
        } else {
            Some(self.chip_index(chip_address)?)
        };

        self.send(Command::WriteRegister {
            broadcast,
            chip_address,
            register_address: register,
            value,
        })?;

        match target {
            Some(index) => self.chips[index].record_write(register, value),
            None => {
                for chip in &mut self.chips {
                    chip.record_write(register, value);
                }
            }
        }
        Ok(())
    }

    /// Read every documented register of one chip, stopping at the first
    /// failure.
    pub fn read_all_registers(&mut self, chip_index: usize) -> Result<()> {
        self.checked_index(chip_index)?;
        for register in ALL_REGISTERS {
            self.read_register(chip_index, register)?;
        }
        Ok(())
    }

    /// Probe the undocumented registers of one chip. Registers that fail to
    /// read are logged and skipped.
    pub fn read_unknown_registers(
        &mut self,
        chip_index: usize,
    ) -> Result<ScanReport<RegisterAddress>> {
        self.checked_index(chip_index)?;

        let mut report = ScanReport::new();
        for register in UNDOCUMENTED_REGISTERS {
            match self.read_register(chip_index, register) {
                Ok(_) => report.read.push(register),
                Err(err) => {
                    warn!(chip = chip_index, ?register, error = %err, "Skipping register");
                    report.failed.push((register, err));
                }
            }
        }
        Ok(report)
    }

    fn check_core(&self, chip_address: u8, core_id: u16) -> Result<usize> {
        let index = self.chip_index(chip_address)?;
        let core_count = self.chips[index].core_count();
        if core_id >= u16::from(core_count) {
            return Err(Error::range("core id", core_id, core_count));
        }
        Ok(index)
    }

    /// Read one core register of core `core_id` on the chip at
    /// `chip_address`.
    ///
    /// The request goes out through `CoreRegisterControl`; the chip answers
    /// with a `CoreRegisterValue` response carrying the core id in its upper
    /// half.
    pub fn read_core_register(
        &mut self,
        chip_address: u8,
        core_id: u16,
        register: CoreRegister,
    ) -> Result<u16> {
        let index = self.check_core(chip_address, core_id)?;

        self.write_register(
            false,
            chip_address,
            RegisterAddress::CoreRegisterControl,
            core_control::read_request(core_id, register),
        )?;
        let response = self.receive()?;

        if response.chip_address != chip_address {
            return Err(Error::mismatch(
                "chip address",
                chip_address,
                response.chip_address,
            ));
        }
        if response.register_address != u8::from(RegisterAddress::CoreRegisterValue) {
            return Err(Error::mismatch(
                "register address",
                RegisterAddress::CoreRegisterValue as u8,
                response.register_address,
            ));
        }

        let chip = &mut self.chips[index];
        chip.store_register(RegisterAddress::CoreRegisterValue, response.value);

        let core = CoreRegisterResponse::from(response.value);
        if core.core_id != core_id {
            return Err(Error::mismatch("core id", core_id, core.core_id));
        }

        chip.store_core_register(register, core.value);
        Ok(core.value)
    }

    /// Read every core register of one core. Registers that fail to read
    /// are logged and skipped.
    pub fn read_all_core_registers(
        &mut self,
        chip_address: u8,
        core_id: u16,
    ) -> Result<ScanReport<CoreRegister>> {
        self.check_core(chip_address, core_id)?;

        let mut report = ScanReport::new();
        for register in ALL_CORE_REGISTERS {
            match self.read_core_register(chip_address, core_id, register) {
                Ok(_) => report.read.push(register),
                Err(err) => {
                    warn!(chip = chip_address, core = core_id, ?register, error = %err,
                        "Skipping core register");
                    report.failed.push((register, err));
                }
            }
        }
        Ok(report)
    }

    /// Write a core register on every core of the chip at `chip_address`.
    pub fn write_core_register(
        &mut self,
        chip_address: u8,
        register: CoreRegister,
        value: u8,
    ) -> Result<()> {
        self.write_register(
            false,
            chip_address,
            RegisterAddress::CoreRegisterControl,
            core_control::write_request(register, value),
        )
    }

    /// Output frequency of PLL `pll` on the chip at `chip_index`, from its
    /// cached parameter register and the chain's input clock.
    pub fn pll_frequency(&self, chip_index: usize, pll: usize) -> Result<u32> {
        let index = self.checked_index(chip_index)?;
        self.chips[index].pll_frequency(pll, self.clock_hz)
    }

    /// Reprogram every chip's UART for `baud`.
    ///
    /// The host side must switch its own rate only after this returns, and
    /// should give the chips a moment before talking at the new rate.
    pub fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        if baud < MIN_BAUD {
            return Err(Error::range("baud rate", baud, MIN_BAUD));
        }
        if baud > MAX_BAUD {
            return Err(Error::range("baud rate", baud, MAX_BAUD));
        }
        if self.chips.is_empty() {
            return Err(Error::NoChips);
        }

        let high_speed = baud > HIGH_SPEED_BAUD;
        let base_clock = if high_speed {
            fast_uart_clock(self.clock_hz)?
        } else {
            self.clock_hz
        };

        let divider = base_clock / baud;
        if divider == 0 {
            return Err(Error::Arithmetic("baud rate above UART clock"));
        }
        if divider > MAX_BAUD_DIVIDER {
            return Err(Error::range("baud divider", divider, MAX_BAUD_DIVIDER));
        }

        if high_speed {
            // Twice, as one write is not reliably picked up by every chip
            for _ in 0..2 {
                self.write_register(true, 0, RegisterAddress::Pll3Parameter, PLL3_HIGH_SPEED)?;
            }
            self.write_register(
                true,
                0,
                RegisterAddress::FastUartConfiguration,
                FAST_UART_HIGH_SPEED,
            )?;
        }

        let misc_control = match self.chips[0].register(RegisterAddress::MiscControl) {
            Some(value) => value,
            None => self.read_register(0, RegisterAddress::MiscControl)?,
        };
        let misc_control = misc_control_with_baud_divider(misc_control, divider, high_speed);
        self.write_register(true, 0, RegisterAddress::MiscControl, misc_control)?;

        info!(baud, divider, high_speed, "Chain baud rate set");
        Ok(())
    }

    /// Hand a job to the chain. Chips report results later through register
    /// reads, so nothing is read back here.
    pub fn send_job(&mut self, job: &Job) -> Result<()> {
        job.validate()?;
        debug!(job_id = job.job_id, midstates = job.midstates.len(), "Sending job");
        self.send(Command::Job(job.clone()))
    }
}

/// UART clock derived from PLL3 once the high speed setting is applied.
fn fast_uart_clock(input_hz: u32) -> Result<u32> {
    let pll3 = PllParameter::from(PLL3_HIGH_SPEED).output_hz(input_hz)?;
    let div4 = (FAST_UART_HIGH_SPEED >> 24) & 0x0f;
    Ok(pll3 / (div4 + 1))
}
