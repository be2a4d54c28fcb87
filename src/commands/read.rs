//! Read command implementation

use super::{hexdump, progress, Target};
use norprog_core::chip::Region;
use norprog_core::engine::{Outcome, Worker};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;

/// Run the read command
pub fn run_read(
    target: &Target,
    output: Option<&Path>,
    start: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    let capacity = engine.descriptor().capacity;
    let length = length.unwrap_or_else(|| capacity.saturating_sub(start));
    let region = Region::new(u64::from(start), length as usize);

    println!(
        "Reading {} bytes at 0x{:06X} from {}",
        length,
        start,
        engine.descriptor().name
    );

    let worker = Worker::new(engine);
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let handle = worker.read(
        region,
        move |chunk: &[u8]| {
            // The receiver lives until the end of this function
            let _ = tx.send(chunk.to_vec());
        },
        |_| {},
    )?;

    let outcome = progress::track(handle, "read")?;
    let data: Vec<u8> = rx.iter().flatten().collect();

    if outcome == Outcome::Cancelled {
        println!("Read cancelled after {} bytes", data.len());
        return Ok(());
    }

    match output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(&data)?;
            println!("Wrote {} bytes to {:?}", data.len(), path);
        }
        None => print!("{}", hexdump::format(u64::from(start), &data)),
    }

    Ok(())
}
