//! Descriptor repository
//!
//! Holds the chip table a session picks its descriptor from. The table can
//! be replaced from RON text (or a RON file) and exported back to RON; the
//! serialized form is a plain list of descriptor records with opcodes as
//! unsigned byte values.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use super::types::{FlashDescriptor, InstructionSet, JedecId, VoltageRange};
use crate::spi::SpiMode;

/// Error type for repository import/export
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// I/O error reading a file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RON parsing error
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// RON serialization error
    #[error("serialize error: {0}")]
    Serialize(#[from] ron::Error),
    /// A descriptor failed validation
    #[error(transparent)]
    Invalid(#[from] crate::Error),
    /// Two descriptors share a name
    #[error("duplicate descriptor name: {0}")]
    Duplicate(String),
}

/// Descriptors compiled into the binary
///
/// Used when no external table is supplied.
pub fn builtin_descriptors() -> Vec<FlashDescriptor> {
    vec![
        FlashDescriptor {
            name: "W25Q64JV".into(),
            manufacturer: "Winbond".into(),
            device_id: Some(0x4017),
            capacity: 8 * 1024 * 1024,
            page_size: 256,
            sector_size: 4096,
            block_size: 64 * 1024,
            voltage: VoltageRange::default(),
            max_clock_hz: 104_000_000,
            spi_modes: vec![SpiMode::Mode0, SpiMode::Mode3],
            instructions: InstructionSet::default(),
        },
        FlashDescriptor {
            name: "MX25L3206E".into(),
            manufacturer: "Macronix".into(),
            device_id: Some(0x2016),
            capacity: 4 * 1024 * 1024,
            page_size: 256,
            sector_size: 4096,
            block_size: 64 * 1024,
            voltage: VoltageRange::default(),
            max_clock_hz: 86_000_000,
            spi_modes: vec![SpiMode::Mode0, SpiMode::Mode3],
            instructions: InstructionSet::default(),
        },
    ]
}

/// Runtime descriptor repository
#[derive(Debug, Clone, Default)]
pub struct DescriptorRepository {
    descriptors: Vec<FlashDescriptor>,
}

impl DescriptorRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Create a repository holding the built-in table
    pub fn builtin() -> Self {
        Self {
            descriptors: builtin_descriptors(),
        }
    }

    /// All descriptors, in table order
    pub fn load(&self) -> &[FlashDescriptor] {
        &self.descriptors
    }

    /// Replace the table with descriptors parsed from RON text
    ///
    /// Every record is validated first; on any error the current table is
    /// left untouched. Returns the number of descriptors imported.
    pub fn import_from(&mut self, text: &str) -> Result<usize, DescriptorError> {
        let parsed: Vec<FlashDescriptor> = ron::from_str(text)?;
        for (i, desc) in parsed.iter().enumerate() {
            desc.validate()?;
            if parsed[..i].iter().any(|d| d.name == desc.name) {
                return Err(DescriptorError::Duplicate(desc.name.clone()));
            }
        }
        let count = parsed.len();
        log::debug!("Imported {} flash descriptors", count);
        self.descriptors = parsed;
        Ok(count)
    }

    /// Replace the table with the contents of a RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, DescriptorError> {
        let content = fs::read_to_string(path)?;
        self.import_from(&content)
    }

    /// Serialize the table to RON text
    pub fn export_to(&self) -> Result<String, DescriptorError> {
        let pretty = ron::ser::PrettyConfig::new().struct_names(false);
        Ok(ron::ser::to_string_pretty(&self.descriptors, pretty)?)
    }

    /// Find a descriptor by exact name (case-insensitive)
    pub fn find_by_name(&self, name: &str) -> Option<&FlashDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Find the descriptor for the chip that answered the read-ID command
    ///
    /// An exact manufacturer and device match wins. Failing that, the first
    /// descriptor of the same manufacturer that lists no device ID is taken.
    pub fn identify(&self, id: &JedecId) -> Option<&FlashDescriptor> {
        if let Some(exact) = self.descriptors.iter().find(|d| d.matches_jedec_id(id)) {
            return Some(exact);
        }
        let fallback = self
            .descriptors
            .iter()
            .find(|d| d.device_id.is_none() && d.manufacturer_id() == Some(id.manufacturer));
        if let Some(desc) = fallback {
            log::debug!("No exact match for {}, using {} by manufacturer", id, desc.name);
        }
        fallback
    }

    /// Find descriptors whose name or manufacturer contains `keyword`
    pub fn search(&self, keyword: &str) -> Vec<&FlashDescriptor> {
        let keyword = keyword.to_lowercase();
        self.descriptors
            .iter()
            .filter(|d| {
                d.name.to_lowercase().contains(&keyword)
                    || d.manufacturer.to_lowercase().contains(&keyword)
            })
            .collect()
    }

    /// Append a descriptor
    pub fn add(&mut self, descriptor: FlashDescriptor) -> Result<(), DescriptorError> {
        descriptor.validate()?;
        if self.find_by_name(&descriptor.name).is_some() {
            return Err(DescriptorError::Duplicate(descriptor.name));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Remove a descriptor by name; returns false if it was not present
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.descriptors.len();
        self.descriptors.retain(|d| !d.name.eq_ignore_ascii_case(name));
        self.descriptors.len() != before
    }

    /// Replace the descriptor called `old_name`; returns false if absent
    pub fn update(
        &mut self,
        old_name: &str,
        descriptor: FlashDescriptor,
    ) -> Result<bool, DescriptorError> {
        descriptor.validate()?;
        let Some(index) = self
            .descriptors
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case(old_name))
        else {
            return Ok(false);
        };
        let clash = self
            .descriptors
            .iter()
            .enumerate()
            .any(|(i, d)| i != index && d.name.eq_ignore_ascii_case(&descriptor.name));
        if clash {
            return Err(DescriptorError::Duplicate(descriptor.name));
        }
        self.descriptors[index] = descriptor;
        Ok(true)
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if the repository is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Iterate over all descriptors
    pub fn iter(&self) -> impl Iterator<Item = &FlashDescriptor> {
        self.descriptors.iter()
    }
}
