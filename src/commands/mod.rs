//! CLI command implementations
//!
//! Every command opens the selected chip through an [`EmulatedChip`] backed
//! by the optional image file, runs one engine operation on a [`Worker`]
//! while a progress bar follows the session state, and writes the image
//! back when the flash contents may have changed.

pub mod chips;
pub mod erase;
pub mod hexdump;
pub mod id;
mod progress;
pub mod read;
pub mod write;

use norprog_core::chip::FlashDescriptor;
use norprog_core::engine::{EnginePolicy, ProgrammingEngine, Worker};
use norprog_core::spi::SpiConfig;
use norprog_dummy::EmulatedChip;
use std::fs;
use std::path::PathBuf;

/// Chip selection plus everything needed to open it
pub struct Target {
    pub descriptor: FlashDescriptor,
    pub policy: EnginePolicy,
    pub spi_hz: Option<u32>,
    pub image: Option<PathBuf>,
}

impl Target {
    /// Build an engine on the emulated chip, loading the image if it exists
    pub fn open(&self) -> Result<ProgrammingEngine<EmulatedChip>, Box<dyn std::error::Error>> {
        let desc = &self.descriptor;
        let chip = match &self.image {
            Some(path) if path.is_file() => {
                let data = fs::read(path)?;
                if data.len() != desc.capacity as usize {
                    log::warn!(
                        "Image {} is {} bytes, chip {} has {}",
                        path.display(),
                        data.len(),
                        desc.name,
                        desc.capacity
                    );
                }
                log::debug!("Loaded image from {}", path.display());
                EmulatedChip::with_data(desc.clone(), &data)
            }
            _ => EmulatedChip::new(desc.clone()),
        };

        let spi = SpiConfig::for_descriptor(desc, self.spi_hz);
        log::debug!("SPI {} at {} Hz", spi.mode, spi.clock_hz);

        let engine = ProgrammingEngine::new(chip.with_spi_config(spi), desc.clone())?;
        Ok(engine.with_policy(self.policy))
    }

    /// Take the engine back from `worker` and store the chip contents
    pub fn save(&self, worker: Worker<EmulatedChip>) -> Result<(), Box<dyn std::error::Error>> {
        let engine = worker.into_engine()?;
        if let Some(path) = &self.image {
            fs::write(path, engine.transport().data())?;
            log::info!("Saved image to {}", path.display());
        }
        Ok(())
    }
}

/// Human readable size
pub fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
