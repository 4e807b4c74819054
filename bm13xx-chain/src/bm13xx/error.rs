//! Error types for BM13xx chain operations.

use std::io;

use thiserror::Error;

use super::register::RegisterAddress;

#[derive(Error, Debug)]
pub enum Error {
    /// The transport returned a frame of the wrong size or with a bad preamble.
    #[error("Framing error: {0}")]
    Framing(FramingFault),

    #[error("CRC5 mismatch in response frame")]
    Checksum,

    /// A chip echoed an address, register or core id other than the one
    /// requested. Usually means the bus lost sync.
    #[error("Protocol mismatch: expected {field} 0x{expected:02x}, got 0x{actual:02x}")]
    ProtocolMismatch {
        field: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("{what} {value} out of range (limit {limit})")]
    Range {
        what: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("No chip with address 0x{0:02x} on the chain")]
    NotFound(u8),

    #[error("Invalid chain configuration: {0}")]
    Configuration(String),

    #[error("Chain already enumerated")]
    AlreadyConfigured,

    #[error("Arithmetic error: {0}")]
    Arithmetic(&'static str),

    #[error("No chips enumerated on the chain")]
    NoChips,

    #[error("Register {0:?} has not been read from the chip")]
    RegisterNotCached(RegisterAddress),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What exactly was wrong with a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingFault {
    Length { expected: usize, actual: usize },
    Preamble([u8; 2]),
}

impl std::fmt::Display for FramingFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingFault::Length { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
            FramingFault::Preamble([a, b]) => write!(f, "bad preamble {:02x} {:02x}", a, b),
        }
    }
}

impl Error {
    /// True for the transport's read timeout, which discovery treats as
    /// "no more chips" and every other operation reports as a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }

    pub(crate) fn range(what: &'static str, value: impl Into<u64>, limit: impl Into<u64>) -> Self {
        Error::Range {
            what,
            value: value.into(),
            limit: limit.into(),
        }
    }

    pub(crate) fn mismatch(field: &'static str, expected: impl Into<u32>, actual: impl Into<u32>) -> Self {
        Error::ProtocolMismatch {
            field,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
