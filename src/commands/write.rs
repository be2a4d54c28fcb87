//! Write command implementation

use super::{progress, Target};
use norprog_core::engine::{Outcome, Worker, WriteOptions};
use std::fs;
use std::path::Path;

/// Run the write command
pub fn run_write(
    target: &Target,
    input: &Path,
    start: u32,
    verify: bool,
    erase: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);

    let engine = target.open()?;
    let capacity = engine.descriptor().capacity as usize;
    if start as usize + data.len() > capacity {
        return Err(format!(
            "{} bytes at 0x{:06X} do not fit into {} ({} bytes)",
            data.len(),
            start,
            engine.descriptor().name,
            capacity
        )
        .into());
    }

    let options = WriteOptions {
        verify,
        auto_erase: erase,
    };
    let worker = Worker::new(engine);
    let handle = worker.write(u64::from(start), data, options)?;
    let result = progress::track(handle, "write");

    // Pages programmed before a failure are still on the chip
    target.save(worker)?;

    match result? {
        Outcome::Completed if verify => println!("Write complete, verified"),
        Outcome::Completed => println!("Write complete"),
        Outcome::Cancelled => println!("Write cancelled"),
    }
    Ok(())
}
