//! Decoder for scripts protected with the Microsoft Script Encoder.
//!
//! `screnc.exe` turns VBScript/JScript into `#@~^<len>==<body><sum>==^#~@`
//! blocks. Each ASCII character of the body goes through one of three
//! substitution tables, picked by its position, and a handful of characters
//! are written as `@` escapes instead.

use super::ToolInvocation;
use anyhow::{Context, Result};
use regex::bytes::{Captures, Regex};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::debug;

/// Start of an encoded block.
pub const ENCODED_MARKER: &[u8] = b"#@~^";

/// How far into the file the marker must appear.
pub const MARKER_WINDOW: usize = 100;

#[allow(clippy::unwrap_used)] // Static regex pattern is hardcoded and valid
static ENCODED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)#@~\^.{6}==(.+?).{6}==\^#~@").unwrap());

/// Substitution column used at each position, repeating every 64 characters.
const COLUMN: [u8; 64] = [
    0, 1, 2, 0, 1, 2, 1, 2, 2, 1, 2, 1, 0, 2, 1, 2, 0, 2, 1, 2, 0, 0, 1, 2, 2, 1, 0, 2, 1, 2, 2, 1,
    0, 0, 2, 1, 2, 1, 2, 0, 2, 0, 0, 1, 2, 0, 2, 1, 0, 2, 1, 2, 0, 0, 1, 2, 2, 0, 0, 1, 2, 0, 2, 1,
];

const TAB_ROW: [u8; 3] = [0x57, 0x6e, 0x7b];

/// Plaintext for each encoded byte 0x20..=0x7f, per column. `<`, `>` and
/// `@` are never emitted by the encoder and map to themselves.
const PRINTABLE_ROWS: [[u8; 3]; 96] = [
    [0x2e, 0x2d, 0x32], [0x47, 0x75, 0x30], [0x7a, 0x52, 0x21], [0x56, 0x60, 0x29],
    [0x42, 0x71, 0x5b], [0x6a, 0x5e, 0x38], [0x2f, 0x49, 0x33], [0x26, 0x5c, 0x3d],
    [0x49, 0x62, 0x58], [0x41, 0x7d, 0x3a], [0x34, 0x29, 0x35], [0x32, 0x36, 0x65],
    [0x5b, 0x20, 0x39], [0x76, 0x7c, 0x5c], [0x72, 0x7a, 0x56], [0x43, 0x7f, 0x73],
    [0x38, 0x6b, 0x66], [0x39, 0x63, 0x4e], [0x70, 0x33, 0x45], [0x45, 0x2b, 0x6b],
    [0x68, 0x68, 0x62], [0x71, 0x51, 0x59], [0x4f, 0x66, 0x78], [0x09, 0x76, 0x5e],
    [0x62, 0x31, 0x7d], [0x44, 0x64, 0x4a], [0x23, 0x54, 0x6d], [0x75, 0x43, 0x71],
    [0x3c, 0x3c, 0x3c], [0x7e, 0x3a, 0x60], [0x3e, 0x3e, 0x3e], [0x5e, 0x7e, 0x53],
    [0x40, 0x40, 0x40], [0x77, 0x45, 0x42], [0x4a, 0x2c, 0x27], [0x61, 0x2a, 0x48],
    [0x5d, 0x74, 0x72], [0x22, 0x27, 0x75], [0x4b, 0x37, 0x31], [0x6f, 0x44, 0x37],
    [0x4e, 0x79, 0x4d], [0x3b, 0x59, 0x52], [0x4c, 0x2f, 0x22], [0x50, 0x6f, 0x54],
    [0x67, 0x26, 0x6a], [0x2a, 0x72, 0x47], [0x7d, 0x6a, 0x64], [0x74, 0x39, 0x2d],
    [0x54, 0x7b, 0x20], [0x2b, 0x3f, 0x7f], [0x2d, 0x38, 0x2e], [0x2c, 0x77, 0x4c],
    [0x30, 0x67, 0x5d], [0x6e, 0x53, 0x7e], [0x6b, 0x47, 0x6c], [0x66, 0x34, 0x6f],
    [0x35, 0x78, 0x79], [0x25, 0x5d, 0x74], [0x21, 0x30, 0x43], [0x64, 0x23, 0x26],
    [0x4d, 0x5a, 0x76], [0x52, 0x5b, 0x25], [0x63, 0x6c, 0x24], [0x3f, 0x48, 0x2b],
    [0x7b, 0x55, 0x28], [0x78, 0x70, 0x23], [0x29, 0x69, 0x41], [0x28, 0x2e, 0x34],
    [0x73, 0x4c, 0x09], [0x59, 0x21, 0x2a], [0x33, 0x24, 0x44], [0x7f, 0x4e, 0x3f],
    [0x6d, 0x50, 0x77], [0x55, 0x09, 0x3b], [0x53, 0x56, 0x55], [0x7c, 0x73, 0x69],
    [0x3a, 0x35, 0x61], [0x5f, 0x61, 0x63], [0x65, 0x4b, 0x50], [0x46, 0x58, 0x67],
    [0x58, 0x3b, 0x51], [0x31, 0x57, 0x49], [0x69, 0x22, 0x4f], [0x6c, 0x6d, 0x46],
    [0x5a, 0x4d, 0x68], [0x48, 0x25, 0x7c], [0x27, 0x28, 0x36], [0x5c, 0x46, 0x70],
    [0x3d, 0x4a, 0x6e], [0x24, 0x32, 0x7a], [0x79, 0x41, 0x2f], [0x37, 0x3d, 0x5f],
    [0x60, 0x5f, 0x4b], [0x51, 0x4f, 0x5a], [0x20, 0x42, 0x2c], [0x36, 0x65, 0x57],
];

/// Whether an encoded block starts near the top of `head`.
pub fn has_encoded_marker(head: &[u8]) -> bool {
    head[..head.len().min(MARKER_WINDOW)]
        .windows(ENCODED_MARKER.len())
        .any(|w| w == ENCODED_MARKER)
}

fn unescape(b: u8) -> Option<u8> {
    match b {
        b'&' => Some(b'\n'),
        b'#' => Some(b'\r'),
        b'*' => Some(b'>'),
        b'!' => Some(b'<'),
        b'$' => Some(b'@'),
        _ => None,
    }
}

/// Decode the body of a single encoded block.
pub fn decode_block(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut position = 0usize;
    let mut bytes = body.iter().copied().peekable();

    while let Some(mut b) = bytes.next() {
        if b == b'@' {
            if let Some(plain) = bytes.peek().copied().and_then(unescape) {
                bytes.next();
                b = plain;
            }
        }
        if !b.is_ascii() {
            out.push(b);
            continue;
        }

        let column = usize::from(COLUMN[position % COLUMN.len()]);
        position += 1;
        out.push(match b {
            b'\t' => TAB_ROW[column],
            b'<' | b'>' | b'@' => b,
            0x20..=0x7f => PRINTABLE_ROWS[usize::from(b - 0x20)][column],
            _ => b,
        });
    }
    out
}

/// Replace every encoded block in `data` with its plaintext. `None` when
/// there is nothing to decode.
pub fn decode_script(data: &[u8]) -> Option<Vec<u8>> {
    if !ENCODED_BLOCK.is_match(data) {
        return None;
    }
    let decoded = ENCODED_BLOCK.replace_all(data, |caps: &Captures<'_>| decode_block(&caps[1]));
    Some(decoded.into_owned())
}

/// Tool-chain entry point: write `<basename>_decoded` for encoded scripts.
pub fn run(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    let data = std::fs::read(invocation.path)
        .with_context(|| format!("Failed to read {}", invocation.path.display()))?;
    let Some(decoded) = decode_script(&data) else {
        debug!("No complete encoded block in {}", invocation.path.display());
        return Ok(Vec::new());
    };

    let basename = invocation
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string());
    let output = invocation.scratch.join(format!("{basename}_decoded"));
    std::fs::write(&output, &decoded)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(vec![output])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `MsgBox "Hello <World>" & vbCrLf` and a `WScript.Echo "a@b"` line,
    /// run through screnc.
    const ENCODED: &[u8] = b"#@~^MwAAAA==\\ko$K6,JC\x7fV^GP@!\x7fGD^N@*E,[P78ZMS0@#@&\t?1DbwOR3^4W~Jm@$4r5g8AAA==^#~@";
    const PLAIN: &[u8] = b"MsgBox \"Hello <World>\" & vbCrLf\r\nWScript.Echo \"a@b\"";

    #[test]
    fn test_decode_script() {
        assert_eq!(decode_script(ENCODED).unwrap(), PLAIN);
    }

    #[test]
    fn test_blocks_embedded_in_markup() {
        let mut page = b"<script language=\"VBScript.Encode\">".to_vec();
        page.extend_from_slice(ENCODED);
        page.extend_from_slice(b"</script>");

        let mut expected = b"<script language=\"VBScript.Encode\">".to_vec();
        expected.extend_from_slice(PLAIN);
        expected.extend_from_slice(b"</script>");
        assert_eq!(decode_script(&page).unwrap(), expected);
    }

    #[test]
    fn test_columns_are_permutations() {
        let encodable: Vec<u8> = std::iter::once(b'\t')
            .chain((0x20u8..=0x7f).filter(|b| !matches!(b, b'<' | b'>' | b'@')))
            .collect();
        for column in 0..3 {
            let mut plain: Vec<u8> = encodable
                .iter()
                .map(|&b| match b {
                    b'\t' => TAB_ROW[column],
                    _ => PRINTABLE_ROWS[usize::from(b - 0x20)][column],
                })
                .collect();
            plain.sort_unstable();
            let mut expected = encodable.clone();
            expected.sort_unstable();
            assert_eq!(plain, expected, "column {column}");
        }
    }

    #[test]
    fn test_marker_window() {
        assert!(has_encoded_marker(ENCODED));
        let mut late = vec![b' '; MARKER_WINDOW];
        late.extend_from_slice(ENCODED);
        assert!(!has_encoded_marker(&late));
        assert!(decode_script(b"MsgBox 1").is_none());
    }

    #[test]
    fn test_run_writes_decoded_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let scratch = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("loader.vbe");
        std::fs::write(&script, ENCODED).unwrap();

        let inv = ToolInvocation { path: &script, binary: None, scratch: scratch.path() };
        let out = run(&inv).unwrap();
        assert_eq!(out, vec![scratch.path().join("loader.vbe_decoded")]);
        assert_eq!(std::fs::read(&out[0]).unwrap(), PLAIN);

        std::fs::write(&script, b"#@~^ truncated").unwrap();
        assert!(run(&inv).unwrap().is_empty());
    }
}
