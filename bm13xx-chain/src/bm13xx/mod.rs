//! BM13xx chain protocol.
//!
//! BM13xx chips (BM1362, BM1366, BM1370, BM1397, ...) share one UART per
//! chain. This module covers the wire format, the register vocabulary and
//! the controller that enumerates and drives a chain.

pub mod chain;
pub mod chip;
pub mod crc;
pub mod error;
pub mod protocol;
pub mod register;

#[cfg(test)]
pub(crate) mod test_support;

pub use chain::{Chain, ChainState, ScanReport};
pub use chip::Chip;
pub use error::{Error, FramingFault, Result};
pub use protocol::{Command, FrameCodec, Job, Midstate, Response};
pub use register::{ChipType, CoreRegister, RegisterAddress};
