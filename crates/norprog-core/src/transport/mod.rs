//! Transport abstraction
//!
//! This module defines the trait a programmer backend implements so the
//! engine can talk to a flash chip.

mod traits;

pub use traits::*;
