mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use triage::TriageConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();

    // RUST_LOG wins over the verbose flag, e.g. RUST_LOG=triage::unpack=trace
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("triage=debug")
    } else {
        EnvFilter::new("triage=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    debug!("Logging initialized (verbose={})", args.verbose);

    let config = match &args.config {
        Some(path) => TriageConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => TriageConfig::default(),
    };

    let output = match &args.command {
        cli::Command::Demux { artifact, package, options, no_unpack } => commands::demux::run(
            &config,
            artifact,
            package.as_deref(),
            options,
            !no_unpack,
            &args.format,
        )?,
        cli::Command::Unzip { archive, dest, options } => {
            commands::unzip::run(archive, dest, options, &args.format)?
        }
        cli::Command::Extract { artifact, dest, signatures } => {
            commands::extract::run(&config, artifact, dest, signatures, &args.format)?
        }
    };

    println!("{output}");
    Ok(())
}
