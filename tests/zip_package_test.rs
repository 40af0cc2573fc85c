mod common;

use common::{build_zip, write};
use tempfile::TempDir;
use triage::zip_package::{extract_package, extract_zip};
use triage::{TaskOptions, TriageError};

/// `level1.zip` holds `level2.zip` ... down to `level<depth>.zip`, whose
/// only member is `payload.exe`.
fn nested_chain(depth: usize) -> Vec<u8> {
    let mut data = build_zip(&[("payload.exe", b"MZ payload")], None);
    for level in (2..=depth).rev() {
        let name = format!("level{level}.zip");
        data = build_zip(&[(name.as_str(), &data)], None);
    }
    data
}

#[test]
fn test_three_levels_fully_expanded() {
    let dir = TempDir::new().unwrap();
    let archive = write(dir.path(), "level1.zip", &nested_chain(3));
    let out = dir.path().join("out");

    extract_zip(&archive, &out, None, 0).unwrap();
    assert!(out.join("level2.zip").is_file());
    assert!(out.join("level3.zip").is_file());
    assert!(out.join("payload.exe").is_file());
}

#[test]
fn test_depth_limit_leaves_innermost_archive() {
    let dir = TempDir::new().unwrap();
    let archive = write(dir.path(), "level1.zip", &nested_chain(5));
    let out = dir.path().join("out");

    extract_zip(&archive, &out, None, 0).unwrap();
    assert!(out.join("level4.zip").is_file());
    assert!(out.join("level5.zip").is_file());
    assert!(!out.join("payload.exe").exists());
}

#[test]
fn test_package_target_selection() {
    let dir = TempDir::new().unwrap();
    let archive = write(
        dir.path(),
        "bundle.zip",
        &build_zip(&[("readme.txt", b"hi"), ("lib.dll", b"MZ"), ("run.exe", b"MZ")], None),
    );
    let out = dir.path().join("out");

    let package = extract_package(&archive, &out, &TaskOptions::parse("")).unwrap();
    assert_eq!(package.target, out.join("run.exe"));
    assert_eq!(package.entries, vec!["readme.txt", "lib.dll", "run.exe"]);

    let package = extract_package(&archive, &out, &TaskOptions::parse("file=lib.dll")).unwrap();
    assert_eq!(package.target, out.join("lib.dll"));
}

#[test]
fn test_target_stays_inside_extract_dir() {
    let dir = TempDir::new().unwrap();
    let archive = write(
        dir.path(),
        "bundle.zip",
        &build_zip(&[("../escape.exe", b"MZ"), ("notes.txt", b"hi")], None),
    );
    let out = dir.path().join("out");

    let package = extract_package(&archive, &out, &TaskOptions::parse("")).unwrap();
    assert_eq!(package.target, out.join("notes.txt"));
    assert!(!dir.path().join("escape.exe").exists());

    for hostile in ["file=../../etc/passwd", "file=/etc/passwd", "file=..\\..\\boot.ini"] {
        let err = extract_package(&archive, &out, &TaskOptions::parse(hostile)).unwrap_err();
        assert!(matches!(err, TriageError::ArchiveExtraction { .. }), "{hostile}");
    }
}

#[test]
fn test_password_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let archive = write(
        dir.path(),
        "locked.zip",
        &build_zip(&[("a.exe", b"MZ locked")], Some("infected")),
    );
    let out = dir.path().join("out");

    extract_package(&archive, &out, &TaskOptions::parse("password=wrong")).unwrap();
    assert_eq!(std::fs::read(out.join("a.exe")).unwrap(), b"MZ locked");
}

#[test]
fn test_unknown_password_is_extraction_error() {
    let dir = TempDir::new().unwrap();
    let archive = write(
        dir.path(),
        "locked.zip",
        &build_zip(&[("a.exe", b"MZ locked")], Some("s3cret")),
    );

    let err = extract_package(&archive, &dir.path().join("out"), &TaskOptions::parse("")).unwrap_err();
    assert!(matches!(err, TriageError::ArchiveExtraction { .. }));
}

#[test]
fn test_member_named_like_archive() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    // The archive sits inside the extraction directory and contains itself by name
    let archive = write(&out, "sample.zip", &build_zip(&[("sample.zip", b"not a zip")], None));

    extract_zip(&archive, &out, None, 0).unwrap();
    assert!(out.join("sample.zip.old").is_file());
    assert_eq!(std::fs::read(out.join("sample.zip")).unwrap(), b"not a zip");
}

#[test]
fn test_invalid_zip() {
    let dir = TempDir::new().unwrap();
    let bogus = write(dir.path(), "bogus.zip", b"this is not a zip file");

    let err = extract_package(&bogus, &dir.path().join("out"), &TaskOptions::parse("")).unwrap_err();
    assert!(matches!(err, TriageError::InvalidArchive { .. }));
}

#[test]
fn test_empty_archive() {
    let dir = TempDir::new().unwrap();
    let empty = write(dir.path(), "empty.zip", &build_zip(&[], None));

    let err = extract_package(&empty, &dir.path().join("out"), &TaskOptions::parse("")).unwrap_err();
    assert!(matches!(err, TriageError::EmptyArchive { .. }));
}
