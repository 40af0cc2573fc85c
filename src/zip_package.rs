//! Direct ZIP package path.
//!
//! Used when a submission is explicitly packaged as a ZIP: extract it (and
//! nested ZIPs) into one directory and pick the member to execute.

use crate::config::{DEFAULT_ARCHIVE_PASSWORD, MAX_ZIP_DEPTH};
use crate::error::{Result, TriageError};
use crate::options::TaskOptions;
use crate::unpack::guards::{sanitize_entry_path, ExtractionGuard};
use crate::unpack::zip::{entry_names, extract_zip_entries_safe};
use regex::Regex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

#[allow(clippy::unwrap_used)] // Static regex pattern is hardcoded and valid
static EXE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.exe|\.scr|\.msi|\.bat|\.lnk|\.js|\.jse|\.vbs|\.vbe|\.wsf)$").unwrap()
});

#[allow(clippy::unwrap_used)] // Static regex pattern is hardcoded and valid
static DLL_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\.dll|\.ocx)$").unwrap());

/// Outcome of extracting a ZIP package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipPackage {
    /// Member chosen for execution, resolved under the extraction directory.
    pub target: PathBuf,
    /// Top-level member names in archive order.
    pub entries: Vec<String>,
}

/// Extract a ZIP package into `extract_dir` and choose its target.
///
/// An unreadable top-level archive is [`TriageError::InvalidArchive`]; an
/// archive without members is [`TriageError::EmptyArchive`]. A `file=`
/// option that resolves outside `extract_dir` is
/// [`TriageError::ArchiveExtraction`].
pub fn extract_package(path: &Path, extract_dir: &Path, options: &TaskOptions) -> Result<ZipPackage> {
    let entries = entry_names(path)
        .map_err(|e| TriageError::invalid_archive(path, format!("Invalid Zip file: {e}")))?;

    extract_zip(path, extract_dir, options.password(), 0)?;

    // Members that would land outside the directory were never written
    let extractable: Vec<String> = entries
        .iter()
        .filter(|e| sanitize_entry_path(e, extract_dir).is_some())
        .cloned()
        .collect();
    let name = select_target(&extractable, options.file())
        .ok_or_else(|| TriageError::empty_archive(path))?;
    let target = sanitize_entry_path(name, extract_dir).ok_or_else(|| {
        TriageError::archive_extraction(format!(
            "Target {name} resolves outside {}",
            extract_dir.display()
        ))
    })?;
    debug!("ZIP package target: {}", target.display());
    Ok(ZipPackage { target, entries })
}

/// Choose the member to execute: the `file` option, then the first
/// executable-like name, then the first DLL, then the first member.
pub fn select_target<'a>(entries: &'a [String], requested: Option<&'a str>) -> Option<&'a str> {
    if let Some(file) = requested {
        return Some(file);
    }
    entries
        .iter()
        .find(|e| EXE_PATTERN.is_match(e))
        .or_else(|| entries.iter().find(|e| DLL_PATTERN.is_match(e)))
        .or_else(|| entries.first())
        .map(String::as_str)
}

/// Extract `zip_path` into `extract_dir`, then recurse into nested `.zip` members.
///
/// `depth` counts from 0 for the submitted archive; at [`MAX_ZIP_DEPTH`] the
/// call returns without extracting, leaving that archive as a plain file.
pub fn extract_zip(
    zip_path: &Path,
    extract_dir: &Path,
    password: Option<&str>,
    depth: usize,
) -> Result<()> {
    if depth >= MAX_ZIP_DEPTH {
        debug!("Depth {} reached, not extracting {}", depth, zip_path.display());
        return Ok(());
    }

    let zip_path = rename_if_overwritten(zip_path)?;
    let names = entry_names(&zip_path).map_err(|e| {
        TriageError::invalid_archive(&zip_path, format!("Invalid Zip file: {e}"))
    })?;

    let extracted = extract_with_fallback(&zip_path, extract_dir, password);

    // Nested archives are attempted even when this level failed part-way
    for name in names.iter().filter(|n| n.to_ascii_lowercase().ends_with(".zip")) {
        let Some(nested) = sanitize_entry_path(name, extract_dir) else {
            continue;
        };
        if !nested.is_file() {
            continue;
        }
        match extract_zip(&nested, extract_dir, password, depth + 1) {
            Ok(()) => {}
            Err(TriageError::InvalidArchive { .. }) => warn!(
                "Nested zip file '{}' name end with 'zip' extension is not a valid zip, skipping extraction",
                name
            ),
            Err(e) => error!("Error to extract nested zip file {}: {}", name, e),
        }
    }

    extracted
}

fn extract_with_fallback(zip_path: &Path, extract_dir: &Path, password: Option<&str>) -> Result<()> {
    match extract_once(zip_path, extract_dir, password) {
        Ok(count) => {
            info!("Extracted {} files from {}", count, zip_path.display());
            Ok(())
        }
        Err(first) => {
            debug!(
                "Extracting {} failed ({:#}), retrying with default password",
                zip_path.display(),
                first
            );
            extract_once(zip_path, extract_dir, Some(DEFAULT_ARCHIVE_PASSWORD))
                .map(|count| info!("Extracted {} files from {}", count, zip_path.display()))
                .map_err(|e| {
                    TriageError::archive_extraction(format!("Unable to extract Zip file: {e:#}"))
                })
        }
    }
}

fn extract_once(zip_path: &Path, extract_dir: &Path, password: Option<&str>) -> anyhow::Result<usize> {
    std::fs::create_dir_all(extract_dir)?;
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;
    let guard = ExtractionGuard::new();
    let written =
        extract_zip_entries_safe(&mut archive, extract_dir, password.map(str::as_bytes), &guard)?;
    Ok(written.len())
}

/// Move the archive aside when one of its members carries its own name.
fn rename_if_overwritten(zip_path: &Path) -> Result<PathBuf> {
    let names = entry_names(zip_path).map_err(|e| {
        TriageError::invalid_archive(zip_path, format!("Invalid Zip file: {e}"))
    })?;
    let Some(own_name) = zip_path.file_name().and_then(|n| n.to_str()) else {
        return Ok(zip_path.to_path_buf());
    };
    if !names.iter().any(|n| n == own_name) {
        return Ok(zip_path.to_path_buf());
    }

    let moved = PathBuf::from(format!("{}.old", zip_path.display()));
    debug!(
        "ZIP file contains a file with the same name, moving original to {}",
        moved.display()
    );
    std::fs::rename(zip_path, &moved)?;
    Ok(moved)
}
