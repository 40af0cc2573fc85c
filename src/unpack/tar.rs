//! TAR and gzip member access.

use super::guards::{read_member, ExtractionGuard, HostileArchiveReason, MAX_FILE_SIZE};
use super::{Member, UnpackError};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tracing::trace;

fn corrupt(e: std::io::Error) -> UnpackError {
    UnpackError::Corrupt {
        message: e.to_string(),
    }
}

/// Decode the regular-file members of a TAR stream.
pub(crate) fn read_members<R: Read>(
    reader: R,
    guard: &ExtractionGuard,
) -> Result<Vec<Member>, UnpackError> {
    let mut archive = tar::Archive::new(reader);
    let mut members = Vec::new();

    for entry_result in archive.entries().map_err(corrupt)? {
        let entry = entry_result.map_err(corrupt)?;
        let name = entry
            .path()
            .map(|p| p.to_string_lossy().to_string())
            .map_err(corrupt)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            guard.add_hostile_reason(HostileArchiveReason::Symlink(name));
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }
        if !guard.check_file_count() {
            break;
        }

        let size = entry.header().size().map_err(corrupt)?;
        if size > MAX_FILE_SIZE {
            guard.add_hostile_reason(HostileArchiveReason::ExcessiveFileSize { file: name, size });
            continue;
        }

        trace!("Reading TAR member {}", name);
        if let Some(data) = read_member(entry, &name, guard).map_err(corrupt)? {
            members.push(Member { name, data });
        }
    }

    Ok(members)
}

/// Decompress a gzip stream, returning the embedded original name if present.
pub(crate) fn gunzip(
    data: &[u8],
    guard: &ExtractionGuard,
) -> Result<(Option<String>, Vec<u8>), UnpackError> {
    let mut decoder = GzDecoder::new(Cursor::new(data));
    let payload = read_member(&mut decoder, "gzip payload", guard)
        .map_err(corrupt)?
        .ok_or_else(|| UnpackError::Corrupt {
            message: "gzip payload exceeds size limits".to_string(),
        })?;
    let original_name = decoder
        .header()
        .and_then(|h| h.filename())
        .map(|n| String::from_utf8_lossy(n).to_string());
    if !guard.check_compression_ratio(data.len() as u64, payload.len() as u64) {
        return Err(UnpackError::Corrupt {
            message: "gzip compression ratio exceeds bomb threshold".to_string(),
        });
    }
    Ok((original_name, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_read_tar_members() {
        let data = build_tar(&[("bin/run.sh", b"#!/bin/sh\n"), ("a.exe", b"MZ")]);
        let members = read_members(Cursor::new(data), &ExtractionGuard::new()).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "bin/run.sh");
        assert_eq!(members[1].data, b"MZ");
    }

    #[test]
    fn test_gunzip_roundtrip_name() {
        let mut encoder = flate2::GzBuilder::new()
            .filename("payload.exe")
            .write(Vec::new(), Compression::default());
        encoder.write_all(b"MZ payload").unwrap();
        let gz = encoder.finish().unwrap();
        let (name, payload) = gunzip(&gz, &ExtractionGuard::new()).unwrap();
        assert_eq!(name.as_deref(), Some("payload.exe"));
        assert_eq!(payload, b"MZ payload");
    }

    #[test]
    fn test_gunzip_without_name() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"text").unwrap();
        let gz = encoder.finish().unwrap();
        let (name, payload) = gunzip(&gz, &ExtractionGuard::new()).unwrap();
        assert!(name.is_none());
        assert_eq!(payload, b"text");
    }
}
