//! Tool-chain entries that shell out to third-party extractors.
//!
//! Every function writes into `invocation.scratch` and reports the regular
//! files found there afterwards.

use super::ToolInvocation;
use crate::process::run_tool;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Line `upx -d` prints when it actually unpacked something.
const UPX_SUCCESS_MARKER: &str = "Unpacked 1 file.";

fn binary<'a>(invocation: &ToolInvocation<'a>) -> Result<&'a Path> {
    invocation
        .binary
        .context("Tool binary was not resolved")
}

fn arg(path: &Path) -> OsString {
    path.as_os_str().to_owned()
}

/// Regular files under `dir`, in a stable order.
pub fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// `msiextract <file> --directory <scratch>`
pub fn msi_extract(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    let output = run_tool(
        binary(invocation)?,
        [
            arg(invocation.path),
            "--directory".into(),
            arg(invocation.scratch),
        ],
    )?;
    debug!("msiextract listed {} entries", output.lines().count());
    Ok(collect_files(invocation.scratch))
}

/// `UnAutoIt extract-all --output-dir <scratch> <file>`
pub fn unautoit(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    run_tool(
        binary(invocation)?,
        [
            "extract-all".into(),
            "--output-dir".into(),
            arg(invocation.scratch),
            arg(invocation.path),
        ],
    )?;
    Ok(collect_files(invocation.scratch))
}

/// `unrar e -p- -y <file> <scratch>/`
pub fn unrar_sfx(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    // unrar treats the destination as a directory only with a trailing separator
    let mut destination = arg(invocation.scratch);
    destination.push(std::path::MAIN_SEPARATOR_STR);
    run_tool(
        binary(invocation)?,
        [
            "e".into(),
            "-p-".into(),
            "-y".into(),
            arg(invocation.path),
            destination,
        ],
    )?;
    Ok(collect_files(invocation.scratch))
}

/// `upx -d <file> -o<scratch>/<basename>_unpacked`
pub fn unupx(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    let basename = invocation
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());
    let target = invocation.scratch.join(format!("{basename}_unpacked"));
    let mut output_arg = OsString::from("-o");
    output_arg.push(&target);

    let output = run_tool(binary(invocation)?, ["-d".into(), arg(invocation.path), output_arg])?;
    if !output.contains(UPX_SUCCESS_MARKER) {
        debug!("upx did not unpack {}", invocation.path.display());
        return Ok(Vec::new());
    }
    Ok(collect_files(invocation.scratch))
}

/// `7z e <file> -o<scratch> -y`
pub fn unnsis(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    let mut output_arg = OsString::from("-o");
    output_arg.push(invocation.scratch);
    run_tool(
        binary(invocation)?,
        ["e".into(), arg(invocation.path), output_arg, "-y".into()],
    )?;
    Ok(collect_files(invocation.scratch))
}

/// `innoextract <file> --output-dir <scratch>`
pub fn inno_extract(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    run_tool(
        binary(invocation)?,
        [
            arg(invocation.path),
            "--output-dir".into(),
            arg(invocation.scratch),
        ],
    )?;
    Ok(collect_files(invocation.scratch))
}
