//! SPI types and command frames
//!
//! This module provides the frame encoder used for every transfer, the
//! status register bits, SPI bus modes, and standard JEDEC opcodes.

pub mod command;
mod mode;
pub mod opcodes;
mod status;

pub use command::{encode, CommandFrame, ADDRESS_BYTES, MAX_ADDRESS};
pub use mode::{SpiConfig, SpiMode};
pub use status::StatusRegister;
