//! Serial transport abstraction.
//!
//! A chain is driven over a half-duplex UART. Anything that offers blocking
//! `Read + Write` works: a serial port opened with a read timeout, or an
//! in-memory script in tests.
//!
//! Reads must honour a timeout and report it as
//! [`std::io::ErrorKind::TimedOut`]. Chain discovery relies on that to learn
//! the bus has gone quiet.

use std::io::{Read, Write};

/// Blocking duplex byte stream to the chain.
pub trait SerialBus: Read + Write {}

impl<T: Read + Write + ?Sized> SerialBus for T {}
