//! Cataloguing of files produced by extraction tools.
//!
//! Each produced file is described (type, hash, preview, identification)
//! and moved into the destination folder under its SHA-256 name, so the
//! same payload produced twice is stored once.

use crate::archive_utils::move_file;
use crate::config::{TriageConfig, TEXT_PREVIEW_BYTES};
use crate::file_io::{convert_to_printable, is_text_type, read_head, sha256_file};
use crate::identify::Identifier;
use crate::magic::{Classifier, MagicClassifier};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata recorded for one produced file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedFileRecord {
    /// Final location: `<destination>/<sha256>`.
    pub path: PathBuf,
    /// Name the tool gave the file.
    pub name: String,
    pub size: u64,
    pub sha256: String,
    #[serde(rename = "type")]
    pub file_type: String,
    /// Printable preview for text-like files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub die: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trid: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

pub struct Cataloguer {
    classifier: Arc<dyn Classifier>,
    identifier: Identifier,
}

impl Cataloguer {
    pub fn new(config: &TriageConfig) -> Self {
        Self {
            classifier: Arc::new(MagicClassifier::new()),
            identifier: Identifier::new(&config.identification),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// Describe and store each file. Files that cannot be read are skipped.
    pub fn catalogue(&self, files: &[PathBuf], destination: &Path) -> Vec<ExtractedFileRecord> {
        if let Err(e) = std::fs::create_dir_all(destination) {
            warn!("Cannot create {}: {}", destination.display(), e);
            return Vec::new();
        }

        files
            .iter()
            .filter_map(|file| match self.catalogue_one(file, destination) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping extracted file {}: {:#}", file.display(), e);
                    None
                }
            })
            .collect()
    }

    fn catalogue_one(&self, file: &Path, destination: &Path) -> anyhow::Result<ExtractedFileRecord> {
        let size = std::fs::metadata(file)?.len();
        let sha256 = sha256_file(file)?;
        let file_type = self.classifier.classify(file);

        let data = if is_text_type(&file_type) {
            Some(convert_to_printable(&read_head(file, TEXT_PREVIEW_BYTES)?))
        } else {
            None
        };

        let die = self.identifier.die(file);
        let trid = self.identifier.trid(file);

        let dest = destination.join(&sha256);
        if dest.exists() {
            debug!("{} already stored as {}", file.display(), dest.display());
        } else {
            move_file(file, &dest)?;
        }

        Ok(ExtractedFileRecord {
            path: dest,
            name: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            sha256,
            file_type,
            data,
            die,
            trid,
            tool_name: None,
        })
    }
}
