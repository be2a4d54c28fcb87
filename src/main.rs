//! norprog - SPI NOR flash programmer
//!
//! Reads, writes, erases and verifies SPI NOR flash chips described by a
//! descriptor table. All flash access goes through the programming engine
//! in `norprog-core`; this binary drives it against an emulated chip whose
//! contents can be kept in an image file between runs.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::Target;
use norprog_core::chip::{DescriptorRepository, FlashDescriptor};
use norprog_core::engine::EnginePolicy;
use std::path::Path;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let repo = match load_repository(cli.chip_db.as_deref()) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("Failed to load chip table: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Loaded {} chip descriptors", repo.len());

    // Table commands don't need a chip
    match &cli.command {
        Commands::ListChips { filter } => {
            commands::chips::list_chips(&repo, filter.as_deref());
            return Ok(());
        }
        Commands::ExportChips { output } => return commands::chips::export_chips(&repo, output),
        Commands::ImportChips { input } => return commands::chips::import_chips(input),
        _ => {}
    }

    let target = Target {
        descriptor: select_chip(&repo, cli.chip.as_deref())?,
        policy: EnginePolicy::default()
            .with_max_attempts(cli.retries)
            .with_poll_interval(Duration::from_millis(cli.poll_ms))
            .with_ready_timeout(Duration::from_millis(cli.timeout_ms)),
        spi_hz: cli.spi_hz,
        image: cli.image,
    };
    log::info!(
        "Using {} {} ({} bytes)",
        target.descriptor.manufacturer,
        target.descriptor.name,
        target.descriptor.capacity
    );

    match cli.command {
        Commands::Id => commands::id::run_id(&target, &repo, cli.chip.is_some()),
        Commands::Read {
            output,
            start,
            length,
        } => commands::read::run_read(&target, output.as_deref(), start, length),
        Commands::Write {
            input,
            start,
            no_verify,
            no_erase,
        } => commands::write::run_write(&target, &input, start, !no_verify, !no_erase),
        Commands::Erase { start, length } => commands::erase::run_erase(&target, start, length),
        Commands::ListChips { .. } | Commands::ExportChips { .. } | Commands::ImportChips { .. } => {
            Ok(())
        }
    }
}

/// Built-in table, or the RON file given with `--chip-db`
fn load_repository(path: Option<&Path>) -> Result<DescriptorRepository, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(DescriptorRepository::builtin());
    };
    if !path.is_file() {
        return Err(format!("Chip table not found: {}", path.display()).into());
    }
    let mut repo = DescriptorRepository::new();
    let count = repo.load_file(path)?;
    log::info!("Loaded {} chips from {}", count, path.display());
    Ok(repo)
}

fn select_chip(
    repo: &DescriptorRepository,
    name: Option<&str>,
) -> Result<FlashDescriptor, Box<dyn std::error::Error>> {
    let found = match name {
        Some(name) => repo.find_by_name(name),
        None => repo.load().first(),
    };
    match (found, name) {
        (Some(desc), _) => Ok(desc.clone()),
        (None, Some(name)) => Err(format!("Unknown chip: {} (see list-chips)", name).into()),
        (None, None) => Err("Chip table is empty".into()),
    }
}
