//! Standard JEDEC SPI flash opcodes
//!
//! These are the values almost every 25-series NOR part uses. A
//! descriptor's instruction set may override any of them; the engine only
//! ever sends opcodes taken from the descriptor.

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - sets the write-enable latch before program/erase
pub const WREN: u8 = 0x06;
/// Write Disable - clears the write-enable latch
pub const WRDI: u8 = 0x04;

// ============================================================================
// Status register
// ============================================================================

/// Read Status Register 1
pub const RDSR: u8 = 0x05;
/// Write Status Register 1
pub const WRSR: u8 = 0x01;

// ============================================================================
// Identification
// ============================================================================

/// Read JEDEC ID (manufacturer + device ID)
pub const RDID: u8 = 0x9F;

// ============================================================================
// Read
// ============================================================================

/// Read Data (no dummy byte, limited clock)
pub const READ: u8 = 0x03;
/// Fast Read (one dummy byte after the address)
pub const FAST_READ: u8 = 0x0B;

// ============================================================================
// Program / erase
// ============================================================================

/// Page Program with 3-byte address
pub const PP: u8 = 0x02;
/// Sector Erase 4KB with 3-byte address
pub const SE_20: u8 = 0x20;
/// Block Erase 64KB with 3-byte address
pub const BE_D8: u8 = 0xD8;
/// Chip Erase
pub const CE_C7: u8 = 0xC7;
/// Chip Erase (alternate opcode)
pub const CE_60: u8 = 0x60;
