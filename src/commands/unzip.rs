//! Unzip command: extract a ZIP package and report the execution target.

use crate::cli;
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use triage::zip_package::extract_package;
use triage::TaskOptions;

#[derive(Serialize)]
struct UnzipReport<'a> {
    target: &'a Path,
    entries: &'a [String],
    extract_dir: PathBuf,
}

pub(crate) fn run(archive: &Path, output: &Path, options: &str, format: &cli::OutputFormat) -> Result<String> {
    let options = TaskOptions::parse(options);
    let package = extract_package(archive, output, &options)?;

    match format {
        cli::OutputFormat::Json => Ok(serde_json::to_string_pretty(&UnzipReport {
            target: &package.target,
            entries: &package.entries,
            extract_dir: output.to_path_buf(),
        })?),
        cli::OutputFormat::Terminal => {
            let mut out = format!("target: {}\n", package.target.display());
            for entry in &package.entries {
                out.push_str(&format!("  {entry}\n"));
            }
            Ok(out.trim_end().to_string())
        }
    }
}
