//! Chip table commands

use super::format_size;
use norprog_core::chip::{DescriptorRepository, FlashDescriptor};
use std::fs;
use std::path::Path;

fn print_table<'a>(chips: impl IntoIterator<Item = &'a FlashDescriptor>) {
    println!(
        "{:<12} {:<16} {:>8} {:>6} {:>7} {:>9}",
        "Vendor", "Name", "Size", "Page", "Sector", "Max clk"
    );
    println!("{}", "-".repeat(63));
    for chip in chips {
        println!(
            "{:<12} {:<16} {:>8} {:>6} {:>7} {:>6} MHz",
            chip.manufacturer,
            chip.name,
            format_size(chip.capacity),
            chip.page_size,
            chip.sector_size,
            chip.max_clock_hz / 1_000_000
        );
    }
}

/// List all chips, optionally filtered by name or manufacturer
pub fn list_chips(repo: &DescriptorRepository, filter: Option<&str>) {
    match filter {
        Some(keyword) => print_table(repo.search(keyword)),
        None => print_table(repo.iter()),
    }
}

/// Write the table as RON
pub fn export_chips(
    repo: &DescriptorRepository,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = repo.export_to()?;
    fs::write(output, text)?;
    println!("Exported {} chips to {:?}", repo.len(), output);
    Ok(())
}

/// Validate a RON table and list what it contains
pub fn import_chips(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut repo = DescriptorRepository::new();
    let count = repo.load_file(input)?;
    println!("{:?}: {} valid chips", input, count);
    print_table(repo.iter());
    Ok(())
}
