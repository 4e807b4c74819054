//! Hardware abstraction traits.
//!
//! The chain controller talks to the outside world through two seams: a
//! blocking byte stream to the chips and a way to wait out settle delays.
//! Both are traits so tests can script the bus and record the delays.

pub mod delay;
pub mod serial;

// Re-export traits
pub use delay::{Delay, StdDelay};
pub use serial::SerialBus;
