use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced at the boundary of the triage pipeline.
///
/// Most of these never leave the step that produced them: the demultiplexer and
/// the tool chain log and swallow them. Only `Configuration`,
/// `DecoderUnavailable`, `InvalidArchive` and `EmptyArchive` are expected to
/// reach a caller.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("MS Office decryptor not available")]
    DecoderUnavailable,

    #[error("Invalid archive {path}: {message}")]
    InvalidArchive { path: PathBuf, message: String },

    #[error("Archive extraction failed: {message}")]
    ArchiveExtraction { message: String },

    #[error("Empty ZIP archive: {path}")]
    EmptyArchive { path: PathBuf },

    #[error("Tool {tool} is not available")]
    ToolUnavailable { tool: String },

    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },
}

pub type Result<T> = std::result::Result<T, TriageError>;

impl TriageError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn invalid_archive<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::InvalidArchive { path: path.into(), message: message.into() }
    }

    pub fn archive_extraction<S: Into<String>>(message: S) -> Self {
        Self::ArchiveExtraction { message: message.into() }
    }

    pub fn empty_archive<P: Into<PathBuf>>(path: P) -> Self {
        Self::EmptyArchive { path: path.into() }
    }

    pub fn tool_unavailable<S: Into<String>>(tool: S) -> Self {
        Self::ToolUnavailable { tool: tool.into() }
    }

    pub fn tool_failed<S1: Into<String>, S2: Into<String>>(tool: S1, message: S2) -> Self {
        Self::ToolFailed { tool: tool.into(), message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            TriageError::DecoderUnavailable.to_string(),
            "MS Office decryptor not available"
        );
        assert_eq!(
            TriageError::tool_failed("UnUPX", "exit status 1").to_string(),
            "Tool UnUPX failed: exit status 1"
        );
        assert!(TriageError::invalid_archive("/tmp/a.zip", "bad header")
            .to_string()
            .contains("/tmp/a.zip"));
    }
}
