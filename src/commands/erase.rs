//! Erase command implementation

use super::{progress, Target};
use norprog_core::chip::Region;
use norprog_core::engine::{Outcome, Worker};

/// Run the erase command
///
/// Without `start` and `length` the whole chip is erased with a single
/// chip-erase command.
pub fn run_erase(
    target: &Target,
    start: Option<u32>,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    let capacity = engine.descriptor().capacity;
    let sector = engine.descriptor().sector_size;
    let worker = Worker::new(engine);

    let handle = if start.is_none() && length.is_none() {
        println!("Erasing entire chip");
        worker.chip_erase()?
    } else {
        let start = start.unwrap_or(0);
        let length = length.unwrap_or_else(|| capacity.saturating_sub(start));
        if start % sector != 0 || length % sector != 0 {
            log::warn!(
                "Region 0x{:06X}+{} is not sector aligned; whole {}-byte sectors are erased",
                start,
                length,
                sector
            );
        }
        println!("Erasing {} bytes at 0x{:06X}", length, start);
        worker.erase(Region::new(u64::from(start), length as usize))?
    };

    let result = progress::track(handle, "erase");
    target.save(worker)?;

    match result? {
        Outcome::Completed => println!("Erase complete"),
        Outcome::Cancelled => println!("Erase cancelled"),
    }
    Ok(())
}
