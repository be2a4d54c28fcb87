//! Progress bar that follows the engine's session state

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use norprog_core::engine::{OperationHandle, Outcome};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const REFRESH: Duration = Duration::from_millis(50);

fn create_progress_bar(phase: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos:>3}}% {} {{msg}}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Wait for `handle`, drawing the engine-reported progress and throughput
pub fn track(
    handle: OperationHandle<Outcome>,
    phase: &str,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let pb = create_progress_bar(phase)?;
    let state = Arc::clone(handle.state());

    while !handle.is_finished() {
        let snap = state.snapshot();
        pb.set_position(u64::from(snap.progress));
        pb.set_message(format!(
            "{} {}/s",
            snap.status,
            HumanBytes(snap.throughput_bytes_per_sec)
        ));
        thread::sleep(REFRESH);
    }

    let result = handle.join();
    let snap = state.snapshot();
    pb.set_position(u64::from(snap.progress));
    match &result {
        Ok(Outcome::Completed) => pb.finish_with_message(format!(
            "done ({}/s)",
            HumanBytes(snap.throughput_bytes_per_sec)
        )),
        Ok(Outcome::Cancelled) => pb.abandon_with_message("cancelled"),
        Err(_) => pb.abandon_with_message("failed"),
    }
    Ok(result?)
}
