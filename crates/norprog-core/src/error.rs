//! Error types for norprog-core

use crate::transport::TransportError;
use thiserror::Error;

/// Core error type
///
/// Every public engine operation resolves into either a value or one of
/// these errors; nothing escapes an operation as a panic.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested region does not fit inside the chip
    #[error(
        "region 0x{address:08X}+{length} exceeds flash capacity of {capacity} bytes"
    )]
    InvalidRegion {
        /// Start address of the rejected region
        address: u64,
        /// Length of the rejected region in bytes
        length: usize,
        /// Capacity of the chip in bytes
        capacity: u32,
    },

    /// A single transfer failed or returned the wrong number of bytes
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The busy bit never cleared within the ready timeout
    #[error("flash busy at 0x{address:06X} for more than {timeout_ms} ms")]
    Timeout {
        /// Address of the unit that was waiting
        address: u32,
        /// Timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// Read-back digest differs from the digest of the written data
    #[error("verification mismatch")]
    VerifyMismatch,

    /// A unit exhausted its retry budget
    #[error("{operation} failed at 0x{address:06X}: {source}")]
    UnitFailed {
        /// Operation the unit belonged to ("read", "program", "erase")
        operation: &'static str,
        /// Address of the failing unit
        address: u32,
        /// Error of the last attempt
        source: Box<Error>,
    },

    /// Another operation is already running on this engine
    #[error("an operation is already running on this engine")]
    Busy,

    /// Descriptor geometry or opcode table is unusable
    #[error("invalid flash descriptor: {0}")]
    InvalidDescriptor(String),

    /// The worker thread could not be started or panicked
    #[error("worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Address of the failing unit, if the error is tied to one
    pub fn address(&self) -> Option<u32> {
        match self {
            Self::UnitFailed { address, .. } | Self::Timeout { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_failure_names_address() {
        let err = Error::UnitFailed {
            operation: "read",
            address: 0x1000,
            source: Box::new(Error::Transport(TransportError::Timeout)),
        };
        assert_eq!(
            err.to_string(),
            "read failed at 0x001000: transport failure: transfer timed out"
        );
        assert_eq!(err.address(), Some(0x1000));
    }

    #[test]
    fn test_verify_mismatch_message() {
        assert_eq!(Error::VerifyMismatch.to_string(), "verification mismatch");
        assert_eq!(Error::VerifyMismatch.address(), None);
    }
}
