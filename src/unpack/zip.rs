//! ZIP member access.
//!
//! Two flavours: [`read_members`] decodes every member into memory for the
//! generic unpacker, and [`extract_zip_entries_safe`] writes members to disk
//! for the ZIP package path.

use super::guards::{
    is_symlink_mode, read_member, sanitize_entry_path, ExtractionGuard, HostileArchiveReason,
    LimitedReader, MAX_FILE_COUNT, MAX_FILE_SIZE,
};
use super::{Member, UnpackError};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use zip::result::ZipError;

fn corrupt(e: ZipError) -> UnpackError {
    UnpackError::Corrupt {
        message: e.to_string(),
    }
}

/// Decode every file member of an in-memory ZIP.
///
/// Encrypted members need `password`; a missing or wrong password yields
/// [`UnpackError::PasswordRequired`]. Members refused by the guard are
/// dropped, the rest of the archive is still returned.
pub(crate) fn read_members(
    data: &[u8],
    password: Option<&str>,
    guard: &ExtractionGuard,
) -> Result<Vec<Member>, UnpackError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(corrupt)?;
    let mut members = Vec::new();

    for i in 0..archive.len() {
        let (encrypted, is_dir, symlink) = {
            let raw = archive.by_index_raw(i).map_err(corrupt)?;
            (
                raw.encrypted(),
                raw.is_dir(),
                raw.unix_mode().is_some_and(is_symlink_mode),
            )
        };
        if is_dir {
            continue;
        }
        if !guard.check_file_count() {
            break;
        }

        let entry = if encrypted {
            let pw = password.ok_or(UnpackError::PasswordRequired)?;
            archive
                .by_index_decrypt(i, pw.as_bytes())
                .map_err(|e| match e {
                    ZipError::InvalidPassword => UnpackError::PasswordRequired,
                    other => corrupt(other),
                })?
        } else {
            archive.by_index(i).map_err(corrupt)?
        };

        let name = entry.name().to_string();
        if symlink {
            guard.add_hostile_reason(HostileArchiveReason::Symlink(name));
            continue;
        }
        if !guard.check_compression_ratio(entry.compressed_size(), entry.size()) {
            continue;
        }

        trace!("Reading ZIP member {}", name);
        match read_member(entry, &name, guard) {
            Ok(Some(data)) => members.push(Member { name, data }),
            Ok(None) => {}
            // ZipCrypto only verifies one header byte; a wrong password
            // usually surfaces here as a CRC failure
            Err(_) if encrypted => return Err(UnpackError::PasswordRequired),
            Err(e) => {
                debug!("Skipping unreadable ZIP member {}: {}", name, e);
            }
        }
    }

    Ok(members)
}

/// Member names in archive order, directories included.
pub(crate) fn entry_names(path: &Path) -> Result<Vec<String>, ZipError> {
    let archive = zip::ZipArchive::new(File::open(path)?)?;
    Ok((0..archive.len())
        .filter_map(|i| archive.name_for_index(i))
        .map(str::to_string)
        .collect())
}

/// Extract ZIP entries to `dest_dir` with optional password.
///
/// Returns the written file paths in archive order.
pub(crate) fn extract_zip_entries_safe<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    dest_dir: &Path,
    password: Option<&[u8]>,
    guard: &ExtractionGuard,
) -> Result<Vec<PathBuf>> {
    let password_display = password.map(|_| "***").unwrap_or("none");
    debug!(
        "Extracting {} entries with password: {}",
        archive.len(),
        password_display
    );

    let mut written = Vec::new();
    for i in 0..archive.len() {
        if !guard.check_file_count() {
            anyhow::bail!("Exceeded maximum file count ({})", MAX_FILE_COUNT);
        }

        let mut entry = match password {
            Some(pw) => archive.by_index_decrypt(i, pw)?,
            None => archive.by_index(i)?,
        };

        let entry_name = entry.name().to_string();
        trace!("Entry {}: {}", i, entry_name);

        let Some(outpath) = sanitize_entry_path(&entry_name, dest_dir) else {
            guard.add_hostile_reason(HostileArchiveReason::PathTraversal(entry_name));
            continue;
        };

        if entry.unix_mode().is_some_and(is_symlink_mode) {
            guard.add_hostile_reason(HostileArchiveReason::Symlink(entry_name));
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if !guard.check_compression_ratio(entry.compressed_size(), entry.size()) {
            continue;
        }
        if entry.size() > MAX_FILE_SIZE {
            guard.add_hostile_reason(HostileArchiveReason::ExcessiveFileSize {
                file: entry_name.clone(),
                size: entry.size(),
            });
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&outpath)?;
        let mut limited = LimitedReader::new(&mut entry, MAX_FILE_SIZE);
        let bytes = std::io::copy(&mut limited, &mut outfile)
            .with_context(|| format!("Failed to extract: {}", entry_name))?;

        if !guard.check_bytes(bytes, &entry_name) {
            anyhow::bail!("Exceeded maximum total extraction size");
        }
        written.push(outpath);
    }
    Ok(written)
}
