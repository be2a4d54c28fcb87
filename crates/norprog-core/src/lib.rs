//! norprog-core - Core library for SPI NOR flash programming
//!
//! This crate provides everything needed to read, write, erase and verify
//! SPI NOR flash chips over a byte-oriented, full-duplex transport:
//!
//! - [`chip`] - chip descriptors (geometry + opcode table) and the
//!   descriptor repository
//! - [`spi`] - command frame encoding, status register bits, SPI modes
//! - [`transport`] - the `Transport` trait a programmer backend implements
//! - [`checksum`] - digests used for write verification
//! - [`engine`] - the programming engine, its session state and worker
//!
//! # Example
//!
//! ```ignore
//! use norprog_core::chip::{DescriptorRepository, Region};
//! use norprog_core::engine::ProgrammingEngine;
//!
//! let repo = DescriptorRepository::builtin();
//! let chip = repo.find_by_name("W25Q64JV").unwrap().clone();
//! let mut engine = ProgrammingEngine::new(transport, chip)?;
//!
//! let mut image = Vec::new();
//! engine.read_region(Region::new(0, 4096), |chunk| image.extend_from_slice(chunk), |_| {})?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod checksum;
pub mod chip;
pub mod engine;
pub mod error;
pub mod spi;
pub mod transport;

pub use error::{Error, Result};
