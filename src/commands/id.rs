//! ID command implementation

use super::{format_size, Target};
use norprog_core::chip::{DescriptorRepository, FlashDescriptor, JedecId};

/// Read the chip ID and look it up in the chip table
///
/// With `selected` set (`--chip` given) the detected chip is compared
/// against it; otherwise the table entry matching the ID is reported.
pub fn run_id(
    target: &Target,
    repo: &DescriptorRepository,
    selected: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = target.open()?;
    let raw = engine.read_id()?;

    let Some(id) = JedecId::from_response(&raw) else {
        return Err(format!("No chip responding (ID bytes {:02X?})", raw).into());
    };

    println!(
        "JEDEC ID:        {} ({})",
        id,
        id.manufacturer_name().unwrap_or("unknown vendor")
    );

    let detected = repo.identify(&id);
    let desc = match (detected, selected) {
        (Some(found), true) if found.name != target.descriptor.name => {
            log::warn!(
                "Chip answers as {} {}, but {} was selected",
                found.manufacturer,
                found.name,
                target.descriptor.name
            );
            &target.descriptor
        }
        (None, true) => {
            log::warn!("ID {} is not in the chip table", id);
            &target.descriptor
        }
        (Some(found), _) => found,
        (None, false) => {
            println!("Chip:            not in the chip table");
            return Ok(());
        }
    };
    print_descriptor(desc);
    Ok(())
}

fn print_descriptor(desc: &FlashDescriptor) {
    println!("Chip:            {} {}", desc.manufacturer, desc.name);
    println!(
        "Size:            {} bytes ({})",
        desc.capacity,
        format_size(desc.capacity)
    );
    println!("Page size:       {} bytes", desc.page_size);
    println!("Sector size:     {} bytes", desc.sector_size);
    println!(
        "Voltage range:   {:.1}V - {:.1}V",
        desc.voltage.min_mv as f32 / 1000.0,
        desc.voltage.max_mv as f32 / 1000.0
    );
}
