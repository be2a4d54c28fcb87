//! Flash chip type definitions

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spi::{opcodes, SpiMode, MAX_ADDRESS};

/// Opcode table of a chip
///
/// Every command the engine sends takes its opcode from here, so chips with
/// non-standard instruction sets only need a different descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSet {
    /// Read JEDEC ID
    pub read_id: u8,
    /// Read data (no dummy byte)
    pub read_data: u8,
    /// Fast read (one dummy byte)
    pub fast_read: u8,
    /// Page program
    pub page_program: u8,
    /// Sector erase
    pub sector_erase: u8,
    /// Block erase
    pub block_erase: u8,
    /// Chip erase
    pub chip_erase: u8,
    /// Write enable
    pub write_enable: u8,
    /// Write disable
    pub write_disable: u8,
    /// Read status register 1
    pub read_status: u8,
    /// Write status register 1
    pub write_status: u8,
}

impl Default for InstructionSet {
    fn default() -> Self {
        Self {
            read_id: opcodes::RDID,
            read_data: opcodes::READ,
            fast_read: opcodes::FAST_READ,
            page_program: opcodes::PP,
            sector_erase: opcodes::SE_20,
            block_erase: opcodes::BE_D8,
            chip_erase: opcodes::CE_C7,
            write_enable: opcodes::WREN,
            write_disable: opcodes::WRDI,
            read_status: opcodes::RDSR,
            write_status: opcodes::WRSR,
        }
    }
}

/// Supply voltage range in millivolts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoltageRange {
    /// Minimum operating voltage
    pub min_mv: u16,
    /// Maximum operating voltage
    pub max_mv: u16,
}

impl Default for VoltageRange {
    fn default() -> Self {
        Self {
            min_mv: 2700,
            max_mv: 3600,
        }
    }
}

/// Flash chip descriptor
///
/// Static geometry and opcode table of one chip model. Loaded once per
/// session and never mutated while an engine uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashDescriptor {
    /// Chip model name (e.g., "W25Q64JV")
    pub name: String,
    /// Manufacturer name (e.g., "Winbond")
    pub manufacturer: String,
    /// JEDEC device ID (memory type and capacity bytes), if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u16>,
    /// Total flash size in bytes
    pub capacity: u32,
    /// Program granularity in bytes
    pub page_size: u32,
    /// Smallest erase unit in bytes
    pub sector_size: u32,
    /// Block erase unit in bytes
    pub block_size: u32,
    /// Supply voltage range
    #[serde(default)]
    pub voltage: VoltageRange,
    /// Maximum SPI clock in Hz
    pub max_clock_hz: u32,
    /// SPI modes the chip accepts
    pub spi_modes: Vec<SpiMode>,
    /// Opcode table
    #[serde(default)]
    pub instructions: InstructionSet,
}

impl FlashDescriptor {
    /// JEDEC manufacturer ID of `manufacturer`, if the name is known
    pub fn manufacturer_id(&self) -> Option<u8> {
        manufacturer::id(&self.manufacturer)
    }

    /// Returns true if this descriptor names the chip that answered `id`
    pub fn matches_jedec_id(&self, id: &JedecId) -> bool {
        self.manufacturer_id() == Some(id.manufacturer) && self.device_id == Some(id.device)
    }

    /// Check the geometry invariants
    ///
    /// All sizes must be non-zero, sector and block sizes must be multiples
    /// of the page size, the capacity a multiple of the sector size, and the
    /// whole chip addressable with 3 address bytes.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(Error::InvalidDescriptor(format!("{}: {}", self.name, reason)));

        if self.name.trim().is_empty() {
            return Err(Error::InvalidDescriptor("descriptor has no name".into()));
        }
        if self.capacity == 0 || self.page_size == 0 || self.sector_size == 0 || self.block_size == 0
        {
            return fail("capacity, page, sector and block sizes must be non-zero".into());
        }
        if self.sector_size % self.page_size != 0 {
            return fail(format!(
                "sector size {} is not a multiple of page size {}",
                self.sector_size, self.page_size
            ));
        }
        if self.block_size % self.page_size != 0 {
            return fail(format!(
                "block size {} is not a multiple of page size {}",
                self.block_size, self.page_size
            ));
        }
        if self.capacity % self.sector_size != 0 {
            return fail(format!(
                "capacity {} is not a multiple of sector size {}",
                self.capacity, self.sector_size
            ));
        }
        if self.capacity - 1 > MAX_ADDRESS {
            return fail(format!(
                "capacity {} needs 4-byte addressing (max 16 MiB)",
                self.capacity
            ));
        }
        if self.spi_modes.is_empty() {
            return fail("no supported SPI mode".into());
        }
        if self.voltage.min_mv > self.voltage.max_mv {
            return fail("minimum voltage above maximum voltage".into());
        }
        Ok(())
    }

    /// Reject regions that do not lie inside `[0, capacity)`
    ///
    /// A zero-length region is accepted at any address up to and including
    /// the capacity.
    pub fn check_region(&self, region: Region) -> Result<()> {
        let fits = region
            .end()
            .is_some_and(|end| end <= self.capacity as u64);
        if fits {
            Ok(())
        } else {
            Err(Error::InvalidRegion {
                address: region.address,
                length: region.length,
                capacity: self.capacity,
            })
        }
    }

    /// Start addresses of every sector overlapped by `region`
    ///
    /// The result may cover bytes outside the region when it is not sector
    /// aligned. Empty regions overlap no sector.
    pub fn sectors_covering(&self, region: Region) -> Vec<u32> {
        let Some(end) = region.end().filter(|_| !region.is_empty()) else {
            return Vec::new();
        };
        let sector = self.sector_size as u64;
        let first = region.address - region.address % sector;
        (first..end)
            .step_by(self.sector_size as usize)
            .map(|addr| addr as u32)
            .collect()
    }

    /// Offset of `addr` inside its page
    pub fn page_offset(&self, addr: u32) -> u32 {
        addr % self.page_size
    }
}

/// A contiguous byte range of the flash address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Start address
    pub address: u64,
    /// Length in bytes
    pub length: usize,
}

impl Region {
    /// Create a new region
    pub const fn new(address: u64, length: usize) -> Self {
        Self { address, length }
    }

    /// Exclusive end address, or `None` on overflow
    pub fn end(&self) -> Option<u64> {
        self.address.checked_add(self.length as u64)
    }

    /// Returns true for a zero-length region
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Split into consecutive pieces of at most `unit` bytes
    ///
    /// Pieces start at the region address, so they are aligned to `unit`
    /// only if the region is. Yields `(address, length)` pairs.
    pub fn chunks(&self, unit: u32) -> impl Iterator<Item = (u32, usize)> {
        let start = self.address;
        let len = self.length;
        let unit = unit.max(1) as usize;
        (0..len)
            .step_by(unit)
            .map(move |offset| ((start + offset as u64) as u32, unit.min(len - offset)))
    }
}

/// Decoded response of the read-ID command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JedecId {
    /// Manufacturer byte
    pub manufacturer: u8,
    /// Memory type and capacity bytes
    pub device: u16,
}

impl JedecId {
    /// Decode the 3 bytes returned by `ProgrammingEngine::read_id`
    ///
    /// Returns `None` for short responses and for the all-ones or all-zeros
    /// patterns a missing chip produces on the bus.
    pub fn from_response(bytes: &[u8]) -> Option<Self> {
        let &[manufacturer, hi, lo, ..] = bytes else {
            return None;
        };
        if matches!(manufacturer, 0x00 | 0xFF) {
            return None;
        }
        Some(Self {
            manufacturer,
            device: u16::from_be_bytes([hi, lo]),
        })
    }

    /// Manufacturer display name, if known
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        manufacturer::name(self.manufacturer)
    }
}

impl core::fmt::Display for JedecId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02X} {:04X}", self.manufacturer, self.device)
    }
}

/// JEDEC manufacturer IDs
pub mod manufacturer {
    /// AMD/Spansion
    pub const AMD: u8 = 0x01;
    /// Atmel
    pub const ATMEL: u8 = 0x1F;
    /// EON
    pub const EON: u8 = 0x1C;
    /// GigaDevice
    pub const GIGADEVICE: u8 = 0xC8;
    /// ISSI
    pub const ISSI: u8 = 0x9D;
    /// Macronix
    pub const MACRONIX: u8 = 0xC2;
    /// Micron / ST / XMC
    pub const MICRON: u8 = 0x20;
    /// SST
    pub const SST: u8 = 0xBF;
    /// Winbond
    pub const WINBOND: u8 = 0xEF;

    const NAMES: &[(u8, &str)] = &[
        (AMD, "AMD/Spansion"),
        (ATMEL, "Atmel"),
        (EON, "EON"),
        (GIGADEVICE, "GigaDevice"),
        (ISSI, "ISSI"),
        (MACRONIX, "Macronix"),
        (MICRON, "Micron"),
        (SST, "SST"),
        (WINBOND, "Winbond"),
    ];

    /// Display name for a JEDEC manufacturer ID
    pub fn name(id: u8) -> Option<&'static str> {
        NAMES.iter().find(|(i, _)| *i == id).map(|(_, n)| *n)
    }

    /// JEDEC manufacturer ID for a display name (case-insensitive)
    pub fn id(name: &str) -> Option<u8> {
        NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(i, _)| *i)
    }
}
