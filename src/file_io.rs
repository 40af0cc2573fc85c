//! Hashing and preview helpers shared by the cataloguer and the driver.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Read at most `limit` bytes from the start of a file.
pub fn read_head(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut head = Vec::with_capacity(limit.min(64 * 1024));
    file.take(limit as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Render bytes as printable text, escaping everything else as `\xNN`.
pub fn convert_to_printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        if b == b' ' || b.is_ascii_graphic() || matches!(b, b'\t' | b'\n' | b'\r') {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02x}"));
        }
    }
    out
}

/// Whether a classifier descriptor denotes text content.
pub fn is_text_type(descriptor: &str) -> bool {
    descriptor.contains("text")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_file_matches_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        let digest = sha256_file(&path).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest, sha256_bytes(b"abc"));
    }

    #[test]
    fn test_read_head_truncates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, vec![b'a'; 10_000]).unwrap();
        assert_eq!(read_head(&path, 8192).unwrap().len(), 8192);
    }

    #[test]
    fn test_convert_to_printable() {
        assert_eq!(convert_to_printable(b"echo hi\r\n"), "echo hi\r\n");
        assert_eq!(convert_to_printable(b"a\x00b\xff"), "a\\x00b\\xff");
    }

    #[test]
    fn test_is_text_type() {
        assert!(is_text_type("DOS batch file, ASCII text"));
        assert!(!is_text_type("PE32 executable (GUI) Intel 80386, for MS Windows"));
    }
}
