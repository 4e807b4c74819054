//! Register vocabulary for BM13xx chips.
//!
//! Chip registers are 32 bits wide and addressed by a single byte. Each chip
//! also exposes eight 16-bit registers per hashing core, reached indirectly
//! through [`RegisterAddress::CoreRegisterControl`] and
//! [`RegisterAddress::CoreRegisterValue`].

use bitvec::prelude::*;
use strum::FromRepr;

use super::error::{Error, Result};

#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RegisterAddress {
    ChipAddress = 0x00,
    HashRate = 0x04,
    Pll0Parameter = 0x08,
    ChipNonceOffset = 0x0C,
    HashCountingNumber = 0x10,
    TicketMask = 0x14,
    MiscControl = 0x18,
    SomeTempRelated = 0x1C,
    OrderedClockEnable = 0x20,
    Undocumented24 = 0x24,
    FastUartConfiguration = 0x28,
    UartRelay = 0x2C,
    Undocumented30 = 0x30,
    Undocumented34 = 0x34,
    TicketMask2 = 0x38,
    CoreRegisterControl = 0x3C,
    CoreRegisterValue = 0x40,
    ExternalTemperatureSensorRead = 0x44,
    ErrorFlag = 0x48,
    NonceErrorCounter = 0x4C,
    NonceOverflowCounter = 0x50,
    AnalogMuxControl = 0x54,
    IoDriverStrengthConfiguration = 0x58,
    TimeOut = 0x5C,
    Pll1Parameter = 0x60,
    Pll2Parameter = 0x64,
    Pll3Parameter = 0x68,
    OrderedClockMonitor = 0x6C,
    Pll0Divider = 0x70,
    Pll1Divider = 0x74,
    Pll2Divider = 0x78,
    Pll3Divider = 0x7C,
    ClockOrderControl0 = 0x80,
    ClockOrderControl1 = 0x84,
    Undocumented88 = 0x88,
    ClockOrderStatus = 0x8C,
    FrequencySweepControl1 = 0x90,
    GoldenNonceForSweepReturn = 0x94,
    ReturnedGroupPatternStatus = 0x98,
    NonceReturnedTimeout = 0x9C,
    ReturnedSinglePatternStatus = 0xA0,
}

impl From<RegisterAddress> for u8 {
    fn from(address: RegisterAddress) -> Self {
        address as u8
    }
}

/// Every documented register, in address order.
pub const ALL_REGISTERS: [RegisterAddress; 37] = [
    RegisterAddress::ChipAddress,
    RegisterAddress::HashRate,
    RegisterAddress::Pll0Parameter,
    RegisterAddress::ChipNonceOffset,
    RegisterAddress::HashCountingNumber,
    RegisterAddress::TicketMask,
    RegisterAddress::MiscControl,
    RegisterAddress::SomeTempRelated,
    RegisterAddress::OrderedClockEnable,
    RegisterAddress::FastUartConfiguration,
    RegisterAddress::UartRelay,
    RegisterAddress::TicketMask2,
    RegisterAddress::CoreRegisterControl,
    RegisterAddress::CoreRegisterValue,
    RegisterAddress::ExternalTemperatureSensorRead,
    RegisterAddress::ErrorFlag,
    RegisterAddress::NonceErrorCounter,
    RegisterAddress::NonceOverflowCounter,
    RegisterAddress::AnalogMuxControl,
    RegisterAddress::IoDriverStrengthConfiguration,
    RegisterAddress::TimeOut,
    RegisterAddress::Pll1Parameter,
    RegisterAddress::Pll2Parameter,
    RegisterAddress::Pll3Parameter,
    RegisterAddress::OrderedClockMonitor,
    RegisterAddress::Pll0Divider,
    RegisterAddress::Pll1Divider,
    RegisterAddress::Pll2Divider,
    RegisterAddress::Pll3Divider,
    RegisterAddress::ClockOrderControl0,
    RegisterAddress::ClockOrderControl1,
    RegisterAddress::ClockOrderStatus,
    RegisterAddress::FrequencySweepControl1,
    RegisterAddress::GoldenNonceForSweepReturn,
    RegisterAddress::ReturnedGroupPatternStatus,
    RegisterAddress::NonceReturnedTimeout,
    RegisterAddress::ReturnedSinglePatternStatus,
];

/// Addresses that answer reads but have no known meaning yet.
pub const UNDOCUMENTED_REGISTERS: [RegisterAddress; 4] = [
    RegisterAddress::Undocumented24,
    RegisterAddress::Undocumented30,
    RegisterAddress::Undocumented34,
    RegisterAddress::Undocumented88,
];

/// PLL parameter registers, indexed by PLL number.
pub const PLL_PARAMETERS: [RegisterAddress; 4] = [
    RegisterAddress::Pll0Parameter,
    RegisterAddress::Pll1Parameter,
    RegisterAddress::Pll2Parameter,
    RegisterAddress::Pll3Parameter,
];

/// Per-core registers, reached through the core register control window.
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CoreRegister {
    ClockDelayCtrl = 0,
    ProcessMonitorCtrl = 1,
    ProcessMonitorData = 2,
    CoreError = 3,
    CoreEnable = 4,
    HashClockCtrl = 5,
    HashClockCounter = 6,
    SweepClockCtrl = 7,
}

pub const ALL_CORE_REGISTERS: [CoreRegister; 8] = [
    CoreRegister::ClockDelayCtrl,
    CoreRegister::ProcessMonitorCtrl,
    CoreRegister::ProcessMonitorData,
    CoreRegister::CoreError,
    CoreRegister::CoreEnable,
    CoreRegister::HashClockCtrl,
    CoreRegister::HashClockCounter,
    CoreRegister::SweepClockCtrl,
];

/// Encoding of the `CoreRegisterControl` word.
///
/// Layout used here:
///
/// ```text
/// read:   [31:16] core id | [15] 0 | [11:8] core reg | [7:0] 0xff
/// write:  [31] 1          | [15] 1 | [11:8] core reg | [7:0] value
/// ```
///
/// A write reaches every core of the addressed chip(s); there is no core id
/// field in the write form.
pub mod core_control {
    use super::CoreRegister;

    const WRITE: u32 = 0x8000_8000;
    /// Write (1) or read (0) select.
    const WR_RD: u32 = 0x0000_8000;
    const READ_FILL: u32 = 0x0000_00ff;

    /// Control word asking `core_id` to report `register` through
    /// `CoreRegisterValue`.
    pub fn read_request(core_id: u16, register: CoreRegister) -> u32 {
        (u32::from(core_id) << 16) | (u32::from(register as u8) << 8) | READ_FILL
    }

    /// Control word writing the low 8 bits of `register` on all cores.
    pub fn write_request(register: CoreRegister, value: u8) -> u32 {
        WRITE | (u32::from(register as u8) << 8) | u32::from(value)
    }

    /// The core register id a control word refers to, if it is a read.
    pub fn requested_register(control: u32) -> Option<CoreRegister> {
        if control & WR_RD != 0 {
            return None;
        }
        CoreRegister::from_repr(((control >> 8) & 0x0f) as u8)
    }
}

/// Contents of a `CoreRegisterValue` read: the echoing core and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRegisterResponse {
    pub core_id: u16,
    pub value: u16,
}

impl From<u32> for CoreRegisterResponse {
    fn from(raw: u32) -> Self {
        Self {
            core_id: (raw >> 16) as u16,
            value: (raw & 0xffff) as u16,
        }
    }
}

/// Decoded PLL parameter register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllParameter {
    pub locked: bool,
    pub enabled: bool,
    pub fb_div: u16,
    pub ref_div: u8,
    pub post_div1: u8,
    pub post_div2: u8,
}

impl From<u32> for PllParameter {
    fn from(raw: u32) -> Self {
        let bits = raw.view_bits::<Lsb0>();
        Self {
            locked: bits[31],
            enabled: bits[30],
            fb_div: bits[16..28].load::<u16>(),
            ref_div: bits[8..14].load::<u8>(),
            post_div1: bits[4..7].load::<u8>(),
            post_div2: bits[0..3].load::<u8>(),
        }
    }
}

impl PllParameter {
    /// PLL output frequency for the given reference clock.
    ///
    /// An unlocked or disabled PLL reports 0 Hz rather than an error.
    pub fn output_hz(&self, input_hz: u32) -> Result<u32> {
        if !self.locked || !self.enabled {
            return Ok(0);
        }

        let divide = u64::from(self.ref_div) * u64::from(self.post_div1) * u64::from(self.post_div2);
        if divide == 0 {
            return Err(Error::Arithmetic("zero PLL divider"));
        }

        let hz = u64::from(input_hz) * u64::from(self.fb_div) / divide;
        u32::try_from(hz).map_err(|_| Error::Arithmetic("PLL output exceeds 32 bits"))
    }
}

/// Merge a UART baud divider into a `MiscControl` value.
///
/// The divider is split into BT8D[4:0] at bits 12:8 and BT8D[8:5] at bits
/// 27:24. BCLK_SEL (bit 16) selects the fast UART clock derived from PLL3.
pub fn misc_control_with_baud_divider(misc_control: u32, divider: u32, fast_clock: bool) -> u32 {
    let mut value = misc_control;
    let bits = value.view_bits_mut::<Lsb0>();
    bits[8..13].store(divider & 0x1f);
    bits[24..28].store((divider >> 5) & 0x0f);
    bits.set(16, fast_clock);
    value
}

/// Known chip types, identified by the upper half of `ChipAddress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    BM1362,
    BM1366,
    BM1368,
    BM1370,
    BM1397,
    Unknown(u16),
}

impl From<u16> for ChipType {
    fn from(id: u16) -> Self {
        match id {
            0x1362 => Self::BM1362,
            0x1366 => Self::BM1366,
            0x1368 => Self::BM1368,
            0x1370 => Self::BM1370,
            0x1397 => Self::BM1397,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for ChipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "unknown ({:04x})", id),
            known => write!(f, "{:?}", known),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn register_tables_round_trip_through_repr() {
        for address in ALL_REGISTERS.iter().chain(UNDOCUMENTED_REGISTERS.iter()) {
            assert_eq!(RegisterAddress::from_repr(u8::from(*address)), Some(*address));
        }
        assert_eq!(RegisterAddress::from_repr(0x41), None);
    }

    #[test]
    fn undocumented_registers_are_not_in_main_table() {
        for address in UNDOCUMENTED_REGISTERS {
            assert!(!ALL_REGISTERS.contains(&address));
        }
    }

    #[test]
    fn pll_parameter_fields() {
        let pll = PllParameter::from(0xc070_0111);
        assert_eq!(
            pll,
            PllParameter {
                locked: true,
                enabled: true,
                fb_div: 0x70,
                ref_div: 1,
                post_div1: 1,
                post_div2: 1,
            }
        );
        assert_eq!(pll.output_hz(25_000_000).unwrap(), 2_800_000_000);
    }

    #[test_case(0x4070_0111; "unlocked")]
    #[test_case(0x8070_0111; "disabled")]
    #[test_case(0x0000_0000; "cleared")]
    fn inactive_pll_reports_zero(raw: u32) {
        assert_eq!(PllParameter::from(raw).output_hz(25_000_000).unwrap(), 0);
    }

    #[test_case(0xc070_0011; "zero ref_div")]
    #[test_case(0xc070_0101; "zero post_div1")]
    #[test_case(0xc070_0110; "zero post_div2")]
    fn zero_divider_is_arithmetic_error(raw: u32) {
        let err = PllParameter::from(raw).output_hz(25_000_000).unwrap_err();
        assert!(matches!(err, Error::Arithmetic(_)));
    }

    #[test]
    fn pll_division_truncates() {
        // fbdiv 0xa0, refdiv 2, postdiv1 3, postdiv2 1: 25 MHz * 160 / 6
        let pll = PllParameter::from(0xc0a0_0231);
        assert_eq!(pll.output_hz(25_000_000).unwrap(), 666_666_666);
    }

    #[test]
    fn core_control_read_layout() {
        assert_eq!(
            core_control::read_request(0x0012, CoreRegister::CoreError),
            0x0012_03ff
        );
        assert_eq!(
            core_control::requested_register(0x0012_03ff),
            Some(CoreRegister::CoreError)
        );
    }

    #[test]
    fn core_control_read_with_high_core_id_bit() {
        let control = core_control::read_request(0x8003, CoreRegister::CoreError);
        assert_eq!(control, 0x8003_03ff);
        assert_eq!(
            core_control::requested_register(control),
            Some(CoreRegister::CoreError)
        );
    }

    #[test]
    fn core_control_write_layout() {
        // Broadcast during chain init: clock delay control = 0xb4 on all cores.
        let control = core_control::write_request(CoreRegister::ClockDelayCtrl, 0xb4);
        assert_eq!(control, 0x8000_80b4);
        assert_eq!(core_control::requested_register(control), None);
    }

    #[test]
    fn core_register_response_split() {
        let response = CoreRegisterResponse::from(0x0005_beef);
        assert_eq!(response.core_id, 5);
        assert_eq!(response.value, 0xbeef);
    }

    #[test]
    fn baud_divider_fields() {
        // 25 MHz / 115200 = 217 = 6 << 5 | 25
        let misc = misc_control_with_baud_divider(0x0000_2001, 217, false);
        assert_eq!(misc, 0x0600_3901);

        let misc = misc_control_with_baud_divider(0xffff_ffff, 0, true);
        assert_eq!(misc, 0xf0ff_e0ff);

        let misc = misc_control_with_baud_divider(0x0001_0000, 100, false);
        assert_eq!(misc & (1 << 16), 0);
    }

    #[test]
    fn chip_type_from_id() {
        assert_eq!(ChipType::from(0x1397), ChipType::BM1397);
        assert_eq!(ChipType::from(0x1370), ChipType::BM1370);
        assert_eq!(ChipType::from(0x1234), ChipType::Unknown(0x1234));
        assert_eq!(ChipType::from(0x1234).to_string(), "unknown (1234)");
    }
}
