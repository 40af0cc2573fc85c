mod common;

use common::{build_zip, encrypted_office, file_names, pe32_with, write};
use std::path::PathBuf;
use tempfile::TempDir;
use triage::demux::Demultiplexer;
use triage::{TriageConfig, TriageError};

fn demultiplexer(dir: &TempDir) -> Demultiplexer {
    Demultiplexer::new(&TriageConfig::with_tmp_root(dir.path().join("tmp")))
}

#[test]
fn test_executable_is_returned_as_is() {
    let dir = TempDir::new().unwrap();
    let sample = write(dir.path(), "sample.exe", &pe32_with(b""));

    let candidates = demultiplexer(&dir).demux(&sample, None, "", true).unwrap();
    assert_eq!(candidates.paths(), &[sample]);
}

#[test]
fn test_explicit_package_skips_demux() {
    let dir = TempDir::new().unwrap();
    let zip = write(dir.path(), "bundle.zip", &build_zip(&[("a.exe", &pe32_with(b""))], None));

    let candidates = demultiplexer(&dir).demux(&zip, Some("zip"), "", true).unwrap();
    assert_eq!(candidates.paths(), &[zip]);
}

#[test]
fn test_zip_members_filtered_by_extension_and_type() {
    let dir = TempDir::new().unwrap();
    let pe = pe32_with(b"");
    let zip = write(
        dir.path(),
        "bundle.zip",
        &build_zip(
            &[
                ("invoice.exe", &pe),
                ("readme.txt", b"nothing to see"),
                ("payload", &pe),
            ],
            None,
        ),
    );

    let candidates = demultiplexer(&dir).demux(&zip, None, "", true).unwrap();
    assert_eq!(file_names(candidates.paths()), vec!["invoice.exe", "payload"]);
    let unpack_root = dir.path().join("tmp").join("triage-unpack");
    assert!(candidates.paths().iter().all(|p| p.starts_with(&unpack_root)));
}

#[test]
fn test_default_and_explicit_passwords() {
    let dir = TempDir::new().unwrap();
    let pe = pe32_with(b"");

    let infected = write(
        dir.path(),
        "infected.zip",
        &build_zip(&[("a.exe", &pe)], Some("infected")),
    );
    let candidates = demultiplexer(&dir).demux(&infected, None, "", true).unwrap();
    assert_eq!(file_names(candidates.paths()), vec!["a.exe"]);

    let custom = write(dir.path(), "custom.zip", &build_zip(&[("b.exe", &pe)], Some("s3cret")));
    let candidates = demultiplexer(&dir)
        .demux(&custom, None, "password=s3cret", true)
        .unwrap();
    assert_eq!(file_names(candidates.paths()), vec!["b.exe"]);

    // Wrong password: nothing extracted, the submission itself comes back
    let candidates = demultiplexer(&dir).demux(&custom, None, "", true).unwrap();
    assert_eq!(candidates.paths(), &[custom]);
}

#[test]
fn test_nested_archive_members_surface() {
    let dir = TempDir::new().unwrap();
    let inner = build_zip(&[("b.exe", &pe32_with(b"")), ("c.js", b"WScript.Echo(1)")], None);
    let outer = write(dir.path(), "outer.zip", &build_zip(&[("inner.zip", &inner)], None));

    let candidates = demultiplexer(&dir).demux(&outer, None, "", true).unwrap();
    assert_eq!(file_names(candidates.paths()), vec!["b.exe", "c.js"]);
}

#[test]
fn test_candidates_capped_at_ten() {
    let dir = TempDir::new().unwrap();
    let pe = pe32_with(b"");
    let names: Vec<String> = (0..15).map(|i| format!("m{i:02}.exe")).collect();
    let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), pe.as_slice())).collect();
    let zip = write(dir.path(), "many.zip", &build_zip(&entries, None));

    let candidates = demultiplexer(&dir).demux(&zip, None, "", true).unwrap();
    assert_eq!(candidates.len(), 10);
    assert_eq!(file_names(candidates.paths())[0], "m00.exe");
}

#[test]
fn test_archive_without_acceptable_members_falls_back() {
    let dir = TempDir::new().unwrap();
    let zip = write(dir.path(), "notes.zip", &build_zip(&[("a.txt", b"hello")], None));

    let candidates = demultiplexer(&dir).demux(&zip, None, "", true).unwrap();
    assert_eq!(candidates.paths(), &[zip]);
}

#[test]
fn test_deep_unpack_disabled() {
    let dir = TempDir::new().unwrap();
    let zip = write(dir.path(), "bundle.zip", &build_zip(&[("a.exe", &pe32_with(b""))], None));

    let candidates = demultiplexer(&dir).demux(&zip, None, "", false).unwrap();
    assert_eq!(candidates.paths(), &[zip]);
}

#[test]
fn test_encrypted_office_without_decoder() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("locked.docx");
    encrypted_office(&doc);

    let demux = demultiplexer(&dir).with_office_decryptor(None);
    let err = demux.demux(&doc, None, "", true).unwrap_err();
    assert!(matches!(err, TriageError::DecoderUnavailable));
}

#[test]
fn test_undecryptable_office_returns_original() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("locked.docx");
    encrypted_office(&doc);

    let candidates = demultiplexer(&dir).demux(&doc, None, "password=x", true).unwrap();
    assert_eq!(candidates.paths(), &[PathBuf::from(&doc)]);
}

#[test]
fn test_missing_artifact_degrades_to_itself() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("gone.zip");

    let candidates = demultiplexer(&dir).demux(&missing, None, "", true).unwrap();
    assert_eq!(candidates.paths(), &[missing]);
}
