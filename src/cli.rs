//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "norprog")]
#[command(author, version, about = "SPI NOR flash programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Chip descriptor table (RON); replaces the built-in table
    #[arg(long, global = true)]
    pub chip_db: Option<PathBuf>,

    /// Chip name (defaults to the first descriptor of the table)
    #[arg(short, long, global = true)]
    pub chip: Option<String>,

    /// Backing file of the emulated chip; loaded at start, saved after
    /// commands that change flash contents
    #[arg(long, global = true)]
    pub image: Option<PathBuf>,

    /// SPI clock in Hz (clamped to the chip maximum)
    #[arg(long, global = true)]
    pub spi_hz: Option<u32>,

    /// Attempts per read chunk, page or sector
    #[arg(long, global = true, default_value_t = 3)]
    pub retries: u32,

    /// Delay between status polls in milliseconds
    #[arg(long, global = true, default_value_t = 10)]
    pub poll_ms: u64,

    /// Busy timeout per program/erase in milliseconds
    #[arg(long, global = true, default_value_t = 10_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read the chip ID and identify it in the chip table
    Id,

    /// Read flash contents to a file (hexdump to stdout without --output)
    Read {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Start address (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Number of bytes (defaults to the rest of the chip)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Write a file to flash
    Write {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Skip read-back verification
        #[arg(long)]
        no_verify: bool,

        /// Don't erase before writing
        #[arg(long)]
        no_erase: bool,
    },

    /// Erase a region, or the whole chip when no region is given
    Erase {
        /// Start address for partial erase (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32)]
        start: Option<u32>,

        /// Length of region to erase (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// List known chips
    ListChips {
        /// Filter by name or manufacturer
        #[arg(long)]
        filter: Option<String>,
    },

    /// Write the chip table as RON
    ExportChips {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Validate a RON chip table and list its chips
    ImportChips {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}
