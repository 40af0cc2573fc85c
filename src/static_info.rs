//! Static file info: the per-artifact record the tool chain enriches.

use crate::catalogue::ExtractedFileRecord;
use crate::config::{TriageConfig, TEXT_PREVIEW_BYTES};
use crate::error::{Result, TriageError};
use crate::extractors::{OutputKind, ToolChain};
use crate::file_io::{convert_to_printable, is_text_type, read_head, sha256_file};
use crate::identify::Identifier;
use crate::magic::{Classifier, MagicClassifier};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StaticInfo {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub sha256: String,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub die: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trid: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extracted_files: Vec<ExtractedFileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_files_tool: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decoded_files: Vec<ExtractedFileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_files_tool: Option<String>,
}

impl StaticInfo {
    /// Append a tool's records. The first tool to contribute to a list
    /// keeps the attribution for that list.
    pub fn merge_tool_output(&mut self, kind: OutputKind, tool: &str, records: Vec<ExtractedFileRecord>) {
        if records.is_empty() {
            return;
        }
        let (files, attribution) = match kind {
            OutputKind::Extracted => (&mut self.extracted_files, &mut self.extracted_files_tool),
            OutputKind::Decoded => (&mut self.decoded_files, &mut self.decoded_files_tool),
        };
        attribution.get_or_insert_with(|| tool.to_string());
        files.extend(records);
    }
}

/// Describes an artifact and runs the extraction tool chain over it.
pub struct StaticAnalyzer {
    classifier: Arc<dyn Classifier>,
    identifier: Identifier,
    tool_chain: ToolChain,
}

impl StaticAnalyzer {
    pub fn new(config: &TriageConfig) -> Self {
        Self {
            classifier: Arc::new(MagicClassifier::new()),
            identifier: Identifier::new(&config.identification),
            tool_chain: ToolChain::new(config),
        }
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// Build the [`StaticInfo`] for `path`, cataloguing anything the tool
    /// chain produces into `destination`.
    ///
    /// Identification runs before the tool chain so guards can use DIE output.
    pub fn static_file_info(&self, path: &Path, destination: &Path, signatures: &[String]) -> Result<StaticInfo> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(TriageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let sha256 = sha256_file(path).map_err(|e| TriageError::Io(std::io::Error::other(format!("{e:#}"))))?;
        let file_type = self.classifier.classify(path);
        let data = if is_text_type(&file_type) {
            Some(convert_to_printable(&read_head(path, TEXT_PREVIEW_BYTES).map_err(|e| TriageError::Io(std::io::Error::other(format!("{e:#}"))))?))
        } else {
            None
        };
        debug!("{}: {} ({} bytes)", path.display(), file_type, metadata.len());

        let mut info = StaticInfo {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: metadata.len(),
            sha256,
            file_type,
            data,
            die: self.identifier.die(path),
            trid: self.identifier.trid(path),
            ..StaticInfo::default()
        };

        self.tool_chain.run(path, destination, signatures, &mut info);
        Ok(info)
    }
}
