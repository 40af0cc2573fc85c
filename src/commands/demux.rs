//! Demux command: print the candidate files for a submission.

use crate::cli;
use anyhow::Result;
use std::path::Path;
use triage::demux::Demultiplexer;
use triage::TriageConfig;

pub(crate) fn run(
    config: &TriageConfig,
    artifact: &Path,
    package: Option<&str>,
    options: &str,
    deep_unpack: bool,
    format: &cli::OutputFormat,
) -> Result<String> {
    let demux = Demultiplexer::new(config);
    let candidates = demux.demux(artifact, package, options, deep_unpack)?;

    match format {
        cli::OutputFormat::Json => Ok(serde_json::to_string_pretty(&candidates)?),
        cli::OutputFormat::Terminal => Ok(candidates
            .paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n")),
    }
}
