//! 7-Zip member access.

use super::guards::{read_member, sanitize_entry_path, ExtractionGuard, HostileArchiveReason, MAX_FILE_SIZE};
use super::{Member, UnpackError};
use sevenz_rust::{Password, SevenZReader};
use std::io::Cursor;
use std::path::Path;
use tracing::trace;

fn map_error(e: sevenz_rust::Error) -> UnpackError {
    match e {
        sevenz_rust::Error::PasswordRequired | sevenz_rust::Error::MaybeBadPassword(_) => {
            UnpackError::PasswordRequired
        }
        other => UnpackError::Corrupt {
            message: other.to_string(),
        },
    }
}

/// Decode every file member of an in-memory 7z archive.
///
/// Solid archives are decoded in stream order, so members are visited
/// sequentially through `for_each_entries`.
pub(crate) fn read_members(
    data: &[u8],
    password: Option<&str>,
    guard: &ExtractionGuard,
) -> Result<Vec<Member>, UnpackError> {
    let password = password.map_or_else(Password::empty, Password::from);
    let mut archive =
        SevenZReader::new(Cursor::new(data), data.len() as u64, password).map_err(map_error)?;
    let mut members = Vec::new();

    archive
        .for_each_entries(|entry, reader| {
            let name = entry.name().to_string();
            if name.is_empty() || entry.is_directory() {
                return Ok(true);
            }
            if !guard.check_file_count() {
                return Ok(false);
            }
            if sanitize_entry_path(&name, Path::new("/")).is_none() {
                guard.add_hostile_reason(HostileArchiveReason::PathTraversal(name));
                return Ok(true);
            }
            let size = entry.size();
            if size > MAX_FILE_SIZE {
                guard.add_hostile_reason(HostileArchiveReason::ExcessiveFileSize { file: name, size });
                return Ok(true);
            }

            trace!("Reading 7z member {}", name);
            if let Some(data) = read_member(reader, &name, guard)? {
                members.push(Member { name, data });
            }
            Ok(true)
        })
        .map_err(map_error)?;

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sevenz_rust::SevenZWriter;

    #[test]
    fn test_reads_members() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("payload.exe"), b"MZ packed by 7z").unwrap();
        let archive_path = dir.path().join("drop.7z");
        let mut sz = SevenZWriter::create(&archive_path).unwrap();
        sz.push_source_path(&src, |_| true).unwrap();
        sz.finish().unwrap();

        let data = std::fs::read(&archive_path).unwrap();
        let members = read_members(&data, None, &ExtractionGuard::new()).unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].name.ends_with("payload.exe"));
        assert_eq!(members[0].data, b"MZ packed by 7z");
    }

    #[test]
    fn test_truncated_archive_is_corrupt() {
        let result = read_members(b"7z\xbc\xaf\x27\x1c\x00\x04", None, &ExtractionGuard::new());
        assert!(matches!(result, Err(UnpackError::Corrupt { .. })));
    }
}
