//! Extraction tool chain.
//!
//! An ordered list of installer/packer/script extractors. Each entry
//! decides from the artifact's type (and signature names, and DIE strings)
//! whether it applies, runs in its own scratch directory, and hands
//! whatever it produced to the [`Cataloguer`].

pub mod batch;
pub mod external;
pub mod vbe;

use crate::archive_utils::TempDirGuard;
use crate::catalogue::{Cataloguer, ExtractedFileRecord};
use crate::config::{ToolSettings, TriageConfig};
use crate::error::{Result, TriageError};
use crate::file_io::read_head;
use crate::process::resolve_binary;
use crate::static_info::StaticInfo;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Which result list a tool's output lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Extracted,
    Decoded,
}

/// What a guard gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub path: &'a Path,
    pub file_type: &'a str,
    /// Names of signatures that matched the task, if any.
    pub signatures: &'a [String],
    /// Detect It Easy strings for the artifact.
    pub die: &'a [String],
    /// Leading bytes of the artifact.
    pub head: &'a [u8],
}

/// Arguments handed to a tool's run function.
#[derive(Debug, Clone, Copy)]
pub struct ToolInvocation<'a> {
    pub path: &'a Path,
    pub binary: Option<&'a Path>,
    pub scratch: &'a Path,
}

/// Bytes of the artifact handed to content guards.
const HEAD_LEN: usize = 512;

pub type GuardFn = fn(&GuardContext<'_>) -> bool;
pub type RunFn = fn(&ToolInvocation<'_>) -> anyhow::Result<Vec<PathBuf>>;

#[derive(Clone)]
pub struct ToolChainEntry {
    pub name: &'static str,
    pub scratch_prefix: &'static str,
    pub output: OutputKind,
    pub enabled: bool,
    pub requires_binary: bool,
    /// Resolved once when the chain is built.
    pub binary: Option<PathBuf>,
    pub guard: GuardFn,
    pub run: RunFn,
}

impl std::fmt::Debug for ToolChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolChainEntry")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl ToolChainEntry {
    /// An entry backed by an external program.
    pub fn external(
        name: &'static str,
        scratch_prefix: &'static str,
        settings: &ToolSettings,
        program: &str,
        guard: GuardFn,
        run: RunFn,
    ) -> Self {
        let binary = if settings.enabled {
            resolve_binary(name, settings, program)
        } else {
            None
        };
        Self {
            name,
            scratch_prefix,
            output: OutputKind::Extracted,
            enabled: settings.enabled,
            requires_binary: true,
            binary,
            guard,
            run,
        }
    }

    /// An entry implemented inside this crate.
    pub fn in_process(
        name: &'static str,
        scratch_prefix: &'static str,
        output: OutputKind,
        settings: &ToolSettings,
        guard: GuardFn,
        run: RunFn,
    ) -> Self {
        Self {
            name,
            scratch_prefix,
            output,
            enabled: settings.enabled,
            requires_binary: false,
            binary: None,
            guard,
            run,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.requires_binary || self.binary.is_some()
    }
}

pub fn is_msi(ctx: &GuardContext<'_>) -> bool {
    ctx.file_type.contains("MSI Installer")
}

pub fn is_vbe(ctx: &GuardContext<'_>) -> bool {
    vbe::has_encoded_marker(ctx.head)
}

pub fn is_batch(ctx: &GuardContext<'_>) -> bool {
    let by_extension = ctx
        .path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("bat"));
    by_extension || ctx.file_type.contains("DOS batch file")
}

pub fn is_autoit(ctx: &GuardContext<'_>) -> bool {
    ctx.signatures
        .iter()
        .any(|s| s.eq_ignore_ascii_case("AutoIT_Compiled"))
}

pub fn is_rar_sfx(ctx: &GuardContext<'_>) -> bool {
    ctx.file_type.contains("RAR self-extracting archive")
}

pub fn is_upx(ctx: &GuardContext<'_>) -> bool {
    ctx.file_type.contains("UPX compressed")
}

pub fn is_nsis(ctx: &GuardContext<'_>) -> bool {
    ctx.file_type.contains("Nullsoft Installer self-extracting archive")
}

pub fn is_inno(ctx: &GuardContext<'_>) -> bool {
    ctx.die.iter().any(|s| s.contains("Inno Setup"))
        || ctx.file_type.contains("Inno Setup installer")
}

pub struct ToolChain {
    entries: Vec<ToolChainEntry>,
    cataloguer: Cataloguer,
    tmp_root: PathBuf,
}

impl ToolChain {
    pub fn new(config: &TriageConfig) -> Self {
        let tools = &config.tools;
        let entries = vec![
            ToolChainEntry::external(
                "MsiExtract",
                "msidump_",
                &tools.msi_extract,
                "msiextract",
                is_msi,
                external::msi_extract,
            ),
            ToolChainEntry::in_process(
                "Vbe",
                "vbe_",
                OutputKind::Decoded,
                &tools.vbe,
                is_vbe,
                vbe::run,
            ),
            ToolChainEntry::in_process(
                "Batch",
                "batch_",
                OutputKind::Decoded,
                &tools.batch,
                is_batch,
                batch::run,
            ),
            ToolChainEntry::external(
                "UnAutoIt",
                "unautoit_",
                &tools.unautoit,
                "UnAutoIt",
                is_autoit,
                external::unautoit,
            ),
            ToolChainEntry::external(
                "UnRarSFX",
                "unrar_",
                &tools.rar_sfx,
                "unrar",
                is_rar_sfx,
                external::unrar_sfx,
            ),
            ToolChainEntry::external("UnUPX", "unupx_", &tools.upx, "upx", is_upx, external::unupx),
            ToolChainEntry::external("UnNSIS", "unnsis_", &tools.nsis, "7z", is_nsis, external::unnsis),
            ToolChainEntry::external(
                "InnoExtract",
                "innoextract_",
                &tools.inno_extract,
                "innoextract",
                is_inno,
                external::inno_extract,
            ),
        ];

        Self {
            entries,
            cataloguer: Cataloguer::new(config),
            tmp_root: config.tmp_root.clone(),
        }
    }

    pub fn entries(&self) -> &[ToolChainEntry] {
        &self.entries
    }

    /// Run every applicable entry in order, merging results into `info`.
    ///
    /// Tool failures are logged and never stop the chain.
    pub fn run(&self, artifact: &Path, destination: &Path, signatures: &[String], info: &mut StaticInfo) {
        let die = info.die.clone().unwrap_or_default();
        let file_type = info.file_type.clone();
        let head = read_head(artifact, HEAD_LEN).unwrap_or_else(|e| {
            debug!("Guards see no content for {}: {:#}", artifact.display(), e);
            Vec::new()
        });
        let ctx = GuardContext {
            path: artifact,
            file_type: &file_type,
            signatures,
            die: &die,
            head: &head,
        };

        for entry in &self.entries {
            if !entry.enabled || !(entry.guard)(&ctx) {
                continue;
            }

            match self.run_entry(entry, artifact, destination) {
                Ok(records) if records.is_empty() => {
                    debug!(tool = entry.name, "No output for {}", artifact.display());
                }
                Ok(records) => {
                    info!(
                        tool = entry.name,
                        "Catalogued {} file(s) from {}",
                        records.len(),
                        artifact.display()
                    );
                    info.merge_tool_output(entry.output, entry.name, records);
                }
                Err(e @ TriageError::ToolUnavailable { .. }) => debug!("{}, skipping", e),
                Err(e) => error!("{} (artifact {})", e, artifact.display()),
            }
        }
    }

    fn run_entry(
        &self,
        entry: &ToolChainEntry,
        artifact: &Path,
        destination: &Path,
    ) -> Result<Vec<ExtractedFileRecord>> {
        if !entry.is_available() {
            return Err(TriageError::tool_unavailable(entry.name));
        }
        let failed = |e: anyhow::Error| TriageError::tool_failed(entry.name, format!("{e:#}"));

        let scratch = TempDirGuard::new_in(&self.tmp_root, entry.scratch_prefix).map_err(failed)?;
        let produced = (entry.run)(&ToolInvocation {
            path: artifact,
            binary: entry.binary.as_deref(),
            scratch: scratch.path(),
        })
        .map_err(failed)?;

        let mut records = self.cataloguer.catalogue(&produced, destination);
        for record in &mut records {
            record.tool_name = Some(entry.name.to_string());
        }
        Ok(records)
    }
}
