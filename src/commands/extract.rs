//! Extract command: static file info plus the extraction tool chain.

use crate::cli;
use anyhow::Result;
use std::path::Path;
use triage::{ExtractedFileRecord, StaticAnalyzer, TriageConfig};

pub(crate) fn run(
    config: &TriageConfig,
    artifact: &Path,
    destination: &Path,
    signatures: &[String],
    format: &cli::OutputFormat,
) -> Result<String> {
    let analyzer = StaticAnalyzer::new(config);
    let info = analyzer.static_file_info(artifact, destination, signatures)?;

    match format {
        cli::OutputFormat::Json => Ok(serde_json::to_string_pretty(&info)?),
        cli::OutputFormat::Terminal => {
            let mut out = format!("{}\n  type: {}\n  sha256: {}\n", info.name, info.file_type, info.sha256);
            if let Some(die) = &info.die {
                out.push_str(&format!("  die: {}\n", die.join("; ")));
            }
            push_records(&mut out, "extracted", info.extracted_files_tool.as_deref(), &info.extracted_files);
            push_records(&mut out, "decoded", info.decoded_files_tool.as_deref(), &info.decoded_files);
            Ok(out.trim_end().to_string())
        }
    }
}

fn push_records(out: &mut String, label: &str, tool: Option<&str>, records: &[ExtractedFileRecord]) {
    if records.is_empty() {
        return;
    }
    out.push_str(&format!("  {} by {}:\n", label, tool.unwrap_or("?")));
    for r in records {
        out.push_str(&format!("    {} {} ({})\n", r.sha256, r.name, r.file_type));
    }
}
