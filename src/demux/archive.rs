//! Recursive archive unpacking for the demultiplexer.
//!
//! Unpacks a container through an [`Unpacker`], walks the resulting tree one
//! level deep and writes every acceptable member to its own directory under
//! the unpack root.

use crate::archive_utils::{sanitize_filename, TempDirGuard};
use crate::config::{TriageConfig, DEFAULT_ARCHIVE_PASSWORD};
use crate::options::TaskOptions;
use crate::unpack::{ArchiveUnpacker, Node, UnpackError, UnpackTree, Unpacker};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Extension of files this pipeline itself generated; never unpacked again.
pub const RESERVED_SCRATCH_EXTENSION: &str = "bin";

/// Member extensions accepted regardless of content type.
pub const DEMUX_EXTENSIONS: &[&str] = &[
    "exe", "dll", "com", "jar", "pdf", "msi", "bin", "scr", "zip", "tar", "gz", "tgz", "rar",
    "htm", "html", "hta", "doc", "dot", "docx", "dotx", "docm", "dotm", "docb", "mht", "mso",
    "js", "jse", "vbs", "vbe", "xls", "xlt", "xlm", "xlsx", "xltx", "xlsm", "xltm", "xlsb",
    "xla", "xlam", "xll", "xlw", "ppt", "pot", "pps", "pptx", "pptm", "potx", "potm", "ppam",
    "ppsx", "ppsm", "sldx", "sldm", "wsf", "bat", "ps1", "sh", "pl", "lnk",
];

/// Package types left whole for a dedicated analysis package.
pub const WHITELISTED_PACKAGES: &[&str] = &["doc", "xls", "ppt", "pub", "jar"];

/// Package types that are never analysed.
pub const BLACKLISTED_PACKAGES: &[&str] = &["apk", "dmg"];

/// Content types accepted regardless of extension.
pub const VALID_TYPES: &[&str] = &["PE32", "Java Jar", "Outlook", "Message", "MS Windows shortcut"];

pub const VALID_LINUX_TYPES: &[&str] = &["Bourne-Again", "POSIX shell script", "ELF", "Python"];

/// Tree levels descended before members are written out as they are.
const MAX_WALK_DEPTH: usize = 2;

/// Whether a content descriptor is on the valid-type allow-list.
pub fn is_valid_type(magic: &str) -> bool {
    VALID_TYPES
        .iter()
        .chain(VALID_LINUX_TYPES)
        .any(|t| magic.contains(t))
}

fn has_demux_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DEMUX_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

pub struct RecursiveUnpacker {
    unpacker: Box<dyn Unpacker>,
    unpack_root: PathBuf,
}

impl RecursiveUnpacker {
    pub fn new(config: &TriageConfig) -> Self {
        Self {
            unpacker: Box::new(ArchiveUnpacker::new()),
            unpack_root: config.unpack_root(),
        }
    }

    pub fn with_unpacker(mut self, unpacker: Box<dyn Unpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    /// Reduce a container to its interesting members.
    ///
    /// `recursion_depth` is how deep `path` already sits in an enclosing
    /// container (0 for a submission). Never fails: every error is logged and
    /// yields fewer results. An empty result means "nothing extracted".
    pub fn unpack_archive(&self, path: &Path, options: &str, recursion_depth: usize) -> Vec<PathBuf> {
        let is_scratch = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(RESERVED_SCRATCH_EXTENSION));
        if is_scratch {
            debug!("Not unpacking generated scratch file {}", path.display());
            return Vec::new();
        }

        let options = TaskOptions::parse(options);
        if options.contains("file") {
            return vec![path.to_path_buf()];
        }

        let password = options.password().unwrap_or(DEFAULT_ARCHIVE_PASSWORD);
        let Some(tree) = self.unpack_with_retry(path, password) else {
            return Vec::new();
        };

        if let Some(package) = tree.package.as_deref() {
            if WHITELISTED_PACKAGES.contains(&package) {
                debug!("{} is a {} package, keeping it whole", path.display(), package);
                return vec![path.to_path_buf()];
            }
            if BLACKLISTED_PACKAGES.contains(&package) {
                info!("{} is a {} package, rejecting it", path.display(), package);
                return Vec::new();
            }
        }

        let mut results = Vec::new();
        for child in &tree.children {
            self.walk(child, recursion_depth + 1, &mut results);
        }
        results
    }

    fn unpack_with_retry(&self, path: &Path, password: &str) -> Option<UnpackTree> {
        match self.unpacker.unpack(path, Some(password)) {
            Ok(tree) => Some(tree),
            Err(UnpackError::PasswordRequired) => {
                debug!("Password rejected for {}, retrying without", path.display());
                match self.unpacker.unpack(path, None) {
                    Ok(tree) => Some(tree),
                    Err(e) => {
                        warn!("Unable to unpack {}: {}", path.display(), e);
                        None
                    }
                }
            }
            Err(UnpackError::Unsupported { magic }) => {
                debug!("{} is not a container ({})", path.display(), magic);
                None
            }
            Err(e) => {
                warn!("Unable to unpack {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Descend into `node`; returns true if it contributed at least one path.
    ///
    /// A container whose members did not all materialize is kept itself.
    fn walk(&self, node: &Node, depth: usize, out: &mut Vec<PathBuf>) -> bool {
        if node.children().is_empty() || depth >= MAX_WALK_DEPTH {
            return match self.materialize(node) {
                Some(path) => {
                    out.push(path);
                    true
                }
                None => false,
            };
        }

        let mut complete = true;
        let mut produced = false;
        for child in node.children() {
            let ok = self.walk(child, depth + 1, out);
            complete &= ok;
            produced |= ok;
        }
        if !complete {
            if let Some(path) = self.materialize(node) {
                out.push(path);
                produced = true;
            }
        }
        produced
    }

    /// Write an accepted member to a fresh directory under the unpack root.
    fn materialize(&self, node: &Node) -> Option<PathBuf> {
        if !has_demux_extension(node.name()) && !is_valid_type(node.magic()) {
            debug!("Skipping member {} ({})", node.name(), node.magic());
            return None;
        }
        if node.data().is_empty() {
            return None;
        }
        match self.write_member(node) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to extract {}: {:#}", node.name(), e);
                None
            }
        }
    }

    fn write_member(&self, node: &Node) -> Result<PathBuf> {
        let dir = TempDirGuard::new_in(&self.unpack_root, "demux_")?;
        let path = dir.path().join(sanitize_filename(node.name()));
        std::fs::write(&path, node.data())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        dir.keep();
        Ok(path)
    }
}
