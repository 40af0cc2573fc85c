//! Mail attachments: RFC 822 messages and Outlook `.msg` compound files.

use super::guards::{ExtractionGuard, HostileArchiveReason, MAX_FILE_SIZE};
use super::{Member, UnpackError};
use mailparse::{DispositionType, ParsedMail};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use tracing::{debug, trace};

const ATTACHMENT_STORAGE_PREFIX: &str = "__attach_version1.0_#";
const ATTACH_DATA_BIN: &str = "__substg1.0_37010102";
/// Long then short file name, Unicode before ANSI.
const ATTACH_NAMES: [&str; 4] = [
    "__substg1.0_3707001F",
    "__substg1.0_3704001F",
    "__substg1.0_3707001E",
    "__substg1.0_3704001E",
];

fn corrupt(message: impl Into<String>) -> UnpackError {
    UnpackError::Corrupt {
        message: message.into(),
    }
}

fn admit(name: String, data: Vec<u8>, guard: &ExtractionGuard, members: &mut Vec<Member>) -> bool {
    if !guard.check_file_count() {
        return false;
    }
    let size = data.len() as u64;
    if size > MAX_FILE_SIZE {
        guard.add_hostile_reason(HostileArchiveReason::ExcessiveFileSize { file: name, size });
    } else if guard.check_bytes(size, &name) {
        members.push(Member { name, data });
    }
    true
}

fn attachment_name(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
        .or_else(|| (disposition.disposition == DispositionType::Attachment).then(String::new))
}

fn collect_parts(
    part: &ParsedMail<'_>,
    guard: &ExtractionGuard,
    members: &mut Vec<Member>,
) -> Result<bool, UnpackError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            if !collect_parts(sub, guard, members)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    let Some(mut name) = attachment_name(part) else {
        return Ok(true);
    };
    if name.is_empty() {
        name = format!("attachment-{}", members.len() + 1);
    }
    let data = part.get_body_raw().map_err(|e| corrupt(e.to_string()))?;
    trace!("Reading mail attachment {}", name);
    Ok(admit(name, data, guard, members))
}

/// Attachments of an RFC 822 message. Inline body text is not a member.
pub(crate) fn read_email_members(
    data: &[u8],
    guard: &ExtractionGuard,
) -> Result<Vec<Member>, UnpackError> {
    let mail = mailparse::parse_mail(data).map_err(|e| corrupt(e.to_string()))?;
    let mut members = Vec::new();
    collect_parts(&mail, guard, &mut members)?;
    Ok(members)
}

fn utf16_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units).trim_end_matches('\0').to_string()
}

/// Attachments of an Outlook message.
///
/// Each `__attach_version1.0_#N` storage holds the payload as a binary
/// property stream. Attachments without one (embedded messages, OLE
/// objects) are skipped.
pub(crate) fn read_msg_members(
    data: &[u8],
    guard: &ExtractionGuard,
) -> Result<Vec<Member>, UnpackError> {
    let mut comp = cfb::CompoundFile::open(Cursor::new(data))
        .map_err(|e| corrupt(format!("not a compound file: {e}")))?;
    let storages: Vec<PathBuf> = comp
        .read_root_storage()
        .filter(|e| e.is_storage() && e.name().starts_with(ATTACHMENT_STORAGE_PREFIX))
        .map(|e| e.path().to_path_buf())
        .collect();

    let mut members = Vec::new();
    for storage in storages {
        let payload_path = storage.join(ATTACH_DATA_BIN);
        if !comp.is_stream(&payload_path) {
            debug!("Attachment {} carries no binary payload", storage.display());
            continue;
        }

        let mut name = None;
        for stream in ATTACH_NAMES {
            let path = storage.join(stream);
            if !comp.is_stream(&path) {
                continue;
            }
            let mut raw = Vec::new();
            comp.open_stream(&path)?.read_to_end(&mut raw)?;
            let decoded = if stream.ends_with("1F") {
                utf16_name(&raw)
            } else {
                String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string()
            };
            if !decoded.is_empty() {
                name = Some(decoded);
                break;
            }
        }
        let name = name.unwrap_or_else(|| {
            let index = storage
                .file_name()
                .map(|n| n.to_string_lossy().trim_start_matches(ATTACHMENT_STORAGE_PREFIX).to_string())
                .unwrap_or_default();
            format!("attachment-{index}")
        });

        let mut payload = Vec::new();
        comp.open_stream(&payload_path)?
            .take(MAX_FILE_SIZE + 1)
            .read_to_end(&mut payload)?;
        trace!("Reading msg attachment {}", name);
        if !admit(name, payload, guard, &mut members) {
            break;
        }
    }
    Ok(members)
}
