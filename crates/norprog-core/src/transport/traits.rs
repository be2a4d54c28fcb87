//! Transport trait definitions

use thiserror::Error;

/// Errors a transport can report for a single transfer
///
/// The engine treats every variant the same way: the current unit failed
/// and may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transfer did not complete in time
    #[error("transfer timed out")]
    Timeout,
    /// The programmer went away
    #[error("device disconnected")]
    Disconnected,
    /// The response length differs from the command length
    #[error("short response: expected {expected} bytes, got {actual}")]
    ShortResponse {
        /// Number of bytes clocked out
        expected: usize,
        /// Number of bytes received
        actual: usize,
    },
    /// Any other backend-specific failure
    #[error("{0}")]
    Other(String),
}

/// Full-duplex SPI transport
///
/// A transport asserts chip select, clocks out every byte of `command`,
/// and returns the bytes clocked in at the same positions. The response
/// must therefore be exactly as long as the command: dummy bytes appended
/// to a read command line up with the data the chip sends back.
///
/// Transports never retry on their own; the engine owns the retry policy.
///
/// ## Example
///
/// ```ignore
/// impl Transport for MyProgrammer {
///     fn transfer(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
///         self.usb_exchange(command)
///             .map_err(|e| TransportError::Other(e.to_string()))
///     }
/// }
/// ```
pub trait Transport {
    /// Exchange `command` for an equally long response
    fn transfer(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}

// Boxed transports let a caller pick the backend at runtime
impl Transport for Box<dyn Transport + Send> {
    fn transfer(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transfer(command)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transfer(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transfer(command)
    }
}
