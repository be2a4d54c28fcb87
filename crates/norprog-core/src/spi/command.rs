//! Command frame encoding
//!
//! Every SPI transaction the engine issues is a single frame: the opcode,
//! an optional 24-bit big-endian address, then either payload bytes
//! (program) or dummy bytes (read, identify, status). Because the bus is
//! full-duplex, the response is exactly as long as the frame and the bytes
//! at the dummy positions carry the chip's answer.

use crate::error::{Error, Result};
use crate::transport::TransportError;

/// Number of address bytes in every addressed command
pub const ADDRESS_BYTES: usize = 3;

/// Highest address expressible with 3-byte addressing (16 MiB - 1)
pub const MAX_ADDRESS: u32 = 0x00FF_FFFF;

/// Value clocked out in dummy positions
const DUMMY: u8 = 0x00;

/// Encode an opcode with an optional 24-bit address
///
/// Returns `[opcode]` or `[opcode, a23..16, a15..8, a7..0]`.
pub fn encode(opcode: u8, address: Option<u32>) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(1 + ADDRESS_BYTES);
    frame.push(opcode);
    if let Some(addr) = address {
        frame.extend_from_slice(&encode_address(addr)?);
    }
    Ok(frame)
}

/// Encode a 24-bit big-endian address
fn encode_address(addr: u32) -> Result<[u8; ADDRESS_BYTES]> {
    if addr > MAX_ADDRESS {
        return Err(Error::InvalidRegion {
            address: addr as u64,
            length: 0,
            capacity: MAX_ADDRESS + 1,
        });
    }
    let [_, hi, mid, lo] = addr.to_be_bytes();
    Ok([hi, mid, lo])
}

/// A single transport frame plus the length of its echo prefix
///
/// The prefix (opcode and address) produces no meaningful response bytes;
/// [`CommandFrame::payload`] strips it from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8>,
    header_len: usize,
}

impl CommandFrame {
    /// Opcode-only command (e.g. write enable)
    pub fn simple(opcode: u8) -> Self {
        Self {
            bytes: vec![opcode],
            header_len: 1,
        }
    }

    /// Opcode + address with no data phase (e.g. sector erase)
    pub fn addressed(opcode: u8, addr: u32) -> Result<Self> {
        let bytes = encode(opcode, Some(addr))?;
        let header_len = bytes.len();
        Ok(Self { bytes, header_len })
    }

    /// Register read with `len` response bytes and no address (status, ID)
    pub fn read_reg(opcode: u8, len: usize) -> Self {
        let mut bytes = Vec::with_capacity(1 + len);
        bytes.push(opcode);
        bytes.resize(1 + len, DUMMY);
        Self {
            bytes,
            header_len: 1,
        }
    }

    /// Addressed read returning `len` data bytes
    pub fn read(opcode: u8, addr: u32, len: usize) -> Result<Self> {
        Self::read_with_dummy(opcode, addr, 0, len)
    }

    /// Addressed read with `dummy` extra bytes between address and data
    ///
    /// Fast read needs one such byte; its response position is discarded
    /// together with the address echo.
    pub fn read_with_dummy(opcode: u8, addr: u32, dummy: usize, len: usize) -> Result<Self> {
        let mut bytes = encode(opcode, Some(addr))?;
        let header_len = bytes.len() + dummy;
        bytes.resize(header_len + len, DUMMY);
        Ok(Self { bytes, header_len })
    }

    /// Addressed write carrying `data` (page program)
    pub fn program(opcode: u8, addr: u32, data: &[u8]) -> Result<Self> {
        let mut bytes = encode(opcode, Some(addr))?;
        let header_len = bytes.len();
        bytes.extend_from_slice(data);
        Ok(Self { bytes, header_len })
    }

    /// Raw frame bytes to hand to the transport
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total frame length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the frame is empty (never the case for built frames)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Length of the opcode/address/dummy prefix
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Strip the echo prefix from a response
    ///
    /// Fails with [`TransportError::ShortResponse`] if the response is not
    /// exactly as long as the frame.
    pub fn payload<'r>(&self, response: &'r [u8]) -> Result<&'r [u8]> {
        if response.len() != self.bytes.len() {
            return Err(TransportError::ShortResponse {
                expected: self.bytes.len(),
                actual: response.len(),
            }
            .into());
        }
        Ok(&response[self.header_len..])
    }
}
