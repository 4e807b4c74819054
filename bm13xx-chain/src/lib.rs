//! Host side driver for chains of BM13xx mining ASICs.
//!
//! [`bm13xx::Chain`] drives every chip on one serial bus: enumeration and
//! addressing, register and core register access, PLL and baud rate
//! setup, and job submission.

pub mod bm13xx;
pub mod config;
pub mod hw_trait;
pub mod tracing;

pub use bm13xx::{Chain, Error, Result};
pub use config::ChainConfig;
