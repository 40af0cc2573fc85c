//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::unstable::write::FileOptionsExt;

/// In-memory ZIP with stored entries, optionally ZipCrypto-protected.
pub fn build_zip(entries: &[(&str, &[u8])], password: Option<&str>) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let mut opts = zip::write::SimpleFileOptions::default();
        if let Some(pw) = password {
            opts = opts.with_deprecated_encryption(pw.as_bytes());
        }
        for (name, data) in entries {
            writer.start_file(*name, opts).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

/// Header-only PE32 GUI image followed by `trailer`.
pub fn pe32_with(trailer: &[u8]) -> Vec<u8> {
    let optional = 0x98;
    let mut data = vec![0u8; 0x200];
    data[0..2].copy_from_slice(b"MZ");
    data[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    data[0x80..0x84].copy_from_slice(b"PE\0\0");
    data[0x84..0x86].copy_from_slice(&0x14cu16.to_le_bytes());
    data[0x94..0x96].copy_from_slice(&0xe0u16.to_le_bytes());
    data[0x96..0x98].copy_from_slice(&0x0102u16.to_le_bytes());
    data[optional..optional + 2].copy_from_slice(&0x10bu16.to_le_bytes());
    data[optional + 32..optional + 36].copy_from_slice(&0x1000u32.to_le_bytes());
    data[optional + 36..optional + 40].copy_from_slice(&0x200u32.to_le_bytes());
    data[optional + 56..optional + 60].copy_from_slice(&0x1000u32.to_le_bytes());
    data[optional + 60..optional + 64].copy_from_slice(&0x200u32.to_le_bytes());
    data[optional + 68..optional + 70].copy_from_slice(&2u16.to_le_bytes());
    data[optional + 92..optional + 96].copy_from_slice(&16u32.to_le_bytes());
    data.extend_from_slice(trailer);
    data
}

/// Compound document carrying the streams of an encrypted office package.
pub fn encrypted_office(path: &Path) {
    let mut comp = cfb::create(path).unwrap();
    comp.create_stream("/EncryptionInfo")
        .unwrap()
        .write_all(&[4, 0, 4, 0, 0x40, 0, 0, 0])
        .unwrap();
    comp.create_stream("/EncryptedPackage")
        .unwrap()
        .write_all(&[0u8; 64])
        .unwrap();
    comp.flush().unwrap();
}

pub fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

/// Executable shell script standing in for a third-party tool.
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write(dir, name, format!("#!/bin/sh\n{body}\n").as_bytes());
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}
