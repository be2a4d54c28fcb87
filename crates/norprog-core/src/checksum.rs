//! Digests for write verification
//!
//! A digest is the CRC-32 (IEEE 802.3, reflected, polynomial 0xEDB88320)
//! of the data together with its length. It only has to tell written data
//! apart from what was read back, so cryptographic strength is not needed.

use core::fmt;

const POLY: u32 = 0xEDB8_8320;

/// Fixed-length digest of a byte sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest {
    crc: u32,
    len: u64,
}

impl Digest {
    /// CRC-32 part of the digest
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Number of bytes digested
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no bytes were digested
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}/{}", self.crc, self.len)
    }
}

/// Streaming digest computation
///
/// Lets read-back data be digested chunk by chunk as it arrives.
#[derive(Debug, Clone)]
pub struct Hasher {
    crc: u32,
    len: u64,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Start a new digest
    pub fn new() -> Self {
        Self {
            crc: 0xFFFF_FFFF,
            len: 0,
        }
    }

    /// Feed more bytes
    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.crc;
        for &byte in bytes {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                let mask = if crc & 1 == 1 { u32::MAX } else { 0 };
                crc = (crc >> 1) ^ (POLY & mask);
            }
        }
        self.crc = crc;
        self.len += bytes.len() as u64;
    }

    /// Finish and return the digest
    pub fn finalize(self) -> Digest {
        Digest {
            crc: !self.crc,
            len: self.len,
        }
    }
}

/// Digest a complete buffer
pub fn digest(bytes: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Compare two digests
pub fn equal(a: &Digest, b: &Digest) -> bool {
    a == b
}
