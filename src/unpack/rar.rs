//! RAR member access through the bundled unrar library.
//!
//! unrar only opens archives by path, so in-memory data is spooled to a
//! temporary file first.

use super::guards::{sanitize_entry_path, ExtractionGuard, HostileArchiveReason, MAX_FILE_SIZE};
use super::{Member, UnpackError};
use std::io::Write;
use std::path::Path;
use tracing::trace;
use unrar::error::{Code, UnrarError};

fn map_error(e: UnrarError) -> UnpackError {
    match e.code {
        Code::MissingPassword => UnpackError::PasswordRequired,
        _ => UnpackError::Corrupt {
            message: e.to_string(),
        },
    }
}

/// Decode every file member of an in-memory RAR archive.
pub(crate) fn read_members(
    data: &[u8],
    password: Option<&str>,
    guard: &ExtractionGuard,
) -> Result<Vec<Member>, UnpackError> {
    let mut spool = tempfile::Builder::new().suffix(".rar").tempfile()?;
    spool.write_all(data)?;
    spool.flush()?;

    let archive = match password {
        Some(pw) => unrar::Archive::with_password(spool.path(), pw),
        None => unrar::Archive::new(spool.path()),
    };
    let mut archive = archive.open_for_processing().map_err(map_error)?;
    let mut members = Vec::new();

    while let Some(entry) = archive.read_header().map_err(map_error)? {
        let header = entry.entry();
        let name = header.filename.to_string_lossy().to_string();
        let size = header.unpacked_size;

        if !header.is_file() {
            archive = entry.skip().map_err(map_error)?;
            continue;
        }
        if header.is_encrypted() && password.is_none() {
            return Err(UnpackError::PasswordRequired);
        }
        if !guard.check_file_count() {
            break;
        }
        if sanitize_entry_path(&name, Path::new("/")).is_none() {
            guard.add_hostile_reason(HostileArchiveReason::PathTraversal(name));
            archive = entry.skip().map_err(map_error)?;
            continue;
        }
        if size > MAX_FILE_SIZE {
            guard.add_hostile_reason(HostileArchiveReason::ExcessiveFileSize { file: name, size });
            archive = entry.skip().map_err(map_error)?;
            continue;
        }

        trace!("Reading RAR member {}", name);
        let encrypted = header.is_encrypted();
        let (data, next) = entry.read().map_err(|e| {
            // A wrong password surfaces as a checksum failure on the member
            if encrypted {
                UnpackError::PasswordRequired
            } else {
                map_error(e)
            }
        })?;
        archive = next;
        if guard.check_bytes(data.len() as u64, &name) {
            members.push(Member { name, data });
        }
    }

    Ok(members)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// RAR 4 archive holding `payload.exe` with the stored method.
    pub(crate) const STORED_RAR: &[u8] = b"Rar!\x1a\x07\x00\xcf\x90s\x00\x00\x0d\x00\x00\x00\x00\x00\x00\x00u:t\x00\x80+\x00\x10\x00\x00\x00\x10\x00\x00\x00\x02\xee\x1e$O\x00`.Z\x140\x0b\x00 \x00\x00\x00payload.exeMZ stored in rar\xc4={\x00@\x07\x00";

    #[test]
    fn test_reads_stored_member() {
        let members = read_members(STORED_RAR, None, &ExtractionGuard::new()).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "payload.exe");
        assert_eq!(members[0].data, b"MZ stored in rar");
    }

    #[test]
    fn test_member_count_limit_respected() {
        let guard = ExtractionGuard::new();
        for _ in 0..crate::unpack::guards::MAX_FILE_COUNT {
            assert!(guard.check_file_count());
        }
        assert!(read_members(STORED_RAR, None, &guard).unwrap().is_empty());
    }
}
