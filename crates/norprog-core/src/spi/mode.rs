//! SPI bus modes and the configuration handed to transports

use crate::chip::FlashDescriptor;
use core::fmt;
use serde::{Deserialize, Serialize};

/// SPI clock polarity/phase mode
///
/// Serialized as its number (0-3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    /// Clock idles high
    pub const fn cpol(self) -> bool {
        matches!(self, Self::Mode2 | Self::Mode3)
    }

    /// Data is sampled on the second clock edge
    pub const fn cpha(self) -> bool {
        matches!(self, Self::Mode1 | Self::Mode3)
    }

    /// Mode number (0-3)
    pub const fn index(self) -> u8 {
        match self {
            Self::Mode0 => 0,
            Self::Mode1 => 1,
            Self::Mode2 => 2,
            Self::Mode3 => 3,
        }
    }
}

impl TryFrom<u8> for SpiMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Mode0),
            1 => Ok(Self::Mode1),
            2 => Ok(Self::Mode2),
            3 => Ok(Self::Mode3),
            other => Err(format!("invalid SPI mode {} (expected 0-3)", other)),
        }
    }
}

impl From<SpiMode> for u8 {
    fn from(mode: SpiMode) -> Self {
        mode.index()
    }
}

impl fmt::Display for SpiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {}", self.index())
    }
}

/// Bus configuration passed through to a transport
///
/// The engine never negotiates these values; it only derives a sane
/// default from the descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpiConfig {
    /// Clock polarity/phase
    pub mode: SpiMode,
    /// SPI clock in Hz
    pub clock_hz: u32,
}

impl SpiConfig {
    /// Pick a configuration the chip supports
    ///
    /// Uses the lowest supported mode and clamps `requested_hz` (or the
    /// chip maximum when `None`) to the chip's maximum clock.
    pub fn for_descriptor(descriptor: &FlashDescriptor, requested_hz: Option<u32>) -> Self {
        let mode = descriptor
            .spi_modes
            .iter()
            .copied()
            .min()
            .unwrap_or(SpiMode::Mode0);
        let clock_hz = requested_hz
            .map(|hz| hz.min(descriptor.max_clock_hz))
            .unwrap_or(descriptor.max_clock_hz);
        Self { mode, clock_hz }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::builtin_descriptors;

    #[test]
    fn test_mode_bits() {
        assert!(!SpiMode::Mode0.cpol() && !SpiMode::Mode0.cpha());
        assert!(SpiMode::Mode3.cpol() && SpiMode::Mode3.cpha());
        assert!(!SpiMode::Mode1.cpol() && SpiMode::Mode1.cpha());
    }

    #[test]
    fn test_mode_from_number() {
        assert_eq!(SpiMode::try_from(2).unwrap(), SpiMode::Mode2);
        assert!(SpiMode::try_from(4).is_err());
    }

    #[test]
    fn test_config_clamps_clock() {
        let chip = &builtin_descriptors()[0];
        let cfg = SpiConfig::for_descriptor(chip, Some(200_000_000));
        assert_eq!(cfg.clock_hz, chip.max_clock_hz);
        assert_eq!(cfg.mode, SpiMode::Mode0);

        let cfg = SpiConfig::for_descriptor(chip, Some(1_000_000));
        assert_eq!(cfg.clock_hz, 1_000_000);
    }
}
