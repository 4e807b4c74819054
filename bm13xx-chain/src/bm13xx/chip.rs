//! Per-chip state: what the host last learned about one ASIC on the chain.

use std::collections::BTreeMap;

use super::error::{Error, Result};
use super::register::{
    core_control, ChipType, CoreRegister, CoreRegisterResponse, PllParameter, RegisterAddress,
    PLL_PARAMETERS,
};

/// One ASIC on the chain.
///
/// Register caches are sparse and filled only by reads. Address, core count
/// and chip id are derived from the cached `ChipAddress` register:
///
/// ```text
/// [31:16] chip id | [15:8] core count | [7:0] bus address
/// ```
#[derive(Debug, Clone, Default)]
pub struct Chip {
    registers: BTreeMap<RegisterAddress, u32>,
    core_registers: BTreeMap<CoreRegister, u16>,
    /// Core register most recently requested through `CoreRegisterControl`.
    /// A later `CoreRegisterValue` read answers for this register.
    last_core_register: Option<CoreRegister>,
}

impl Chip {
    /// A chip just discovered, knowing only its `ChipAddress` register.
    pub fn new(chip_address_register: u32) -> Self {
        let mut chip = Self::default();
        chip.registers
            .insert(RegisterAddress::ChipAddress, chip_address_register);
        chip
    }

    fn chip_address_register(&self) -> u32 {
        self.register(RegisterAddress::ChipAddress).unwrap_or(0)
    }

    pub fn address(&self) -> u8 {
        (self.chip_address_register() & 0xff) as u8
    }

    pub fn core_count(&self) -> u8 {
        ((self.chip_address_register() >> 8) & 0xff) as u8
    }

    pub fn chip_id(&self) -> u16 {
        (self.chip_address_register() >> 16) as u16
    }

    pub fn chip_type(&self) -> ChipType {
        ChipType::from(self.chip_id())
    }

    /// Last value read from `address`, if any.
    pub fn register(&self, address: RegisterAddress) -> Option<u32> {
        self.registers.get(&address).copied()
    }

    /// All cached registers in address order.
    pub fn registers(&self) -> impl Iterator<Item = (RegisterAddress, u32)> + '_ {
        self.registers.iter().map(|(k, v)| (*k, *v))
    }

    pub fn core_register(&self, register: CoreRegister) -> Option<u16> {
        self.core_registers.get(&register).copied()
    }

    pub fn core_registers(&self) -> impl Iterator<Item = (CoreRegister, u16)> + '_ {
        self.core_registers.iter().map(|(k, v)| (*k, *v))
    }

    pub fn last_core_register(&self) -> Option<CoreRegister> {
        self.last_core_register
    }

    /// Interpret the cached `CoreRegisterValue` against the core register
    /// last requested from this chip.
    pub fn core_register_response(&self) -> Option<(CoreRegister, CoreRegisterResponse)> {
        let register = self.last_core_register?;
        let raw = self.register(RegisterAddress::CoreRegisterValue)?;
        Some((register, CoreRegisterResponse::from(raw)))
    }

    /// Output frequency of PLL `pll` (0..=3) given the chip's input clock.
    pub fn pll_frequency(&self, pll: usize, input_hz: u32) -> Result<u32> {
        let address = *PLL_PARAMETERS
            .get(pll)
            .ok_or_else(|| Error::range("PLL index", pll as u64, (PLL_PARAMETERS.len() - 1) as u64))?;
        let raw = self
            .register(address)
            .ok_or(Error::RegisterNotCached(address))?;
        PllParameter::from(raw).output_hz(input_hz)
    }

    /// Record a value read back from the chip.
    pub(crate) fn store_register(&mut self, address: RegisterAddress, value: u32) {
        self.registers.insert(address, value);
    }

    /// Record a value written to the chip. Registers never read stay absent.
    pub(crate) fn record_write(&mut self, address: RegisterAddress, value: u32) {
        if let Some(cached) = self.registers.get_mut(&address) {
            *cached = value;
        }
        if address == RegisterAddress::CoreRegisterControl {
            if let Some(register) = core_control::requested_register(value) {
                self.last_core_register = Some(register);
            }
        }
    }

    /// Replace the low byte of the cached `ChipAddress` register.
    pub(crate) fn set_address(&mut self, address: u8) {
        let raw = (self.chip_address_register() & !0xff) | u32::from(address);
        self.registers.insert(RegisterAddress::ChipAddress, raw);
    }

    pub(crate) fn store_core_register(&mut self, register: CoreRegister, value: u16) {
        self.core_registers.insert(register, value);
    }
}
