//! Generic container unpacking.
//!
//! [`Unpacker`] is the seam the recursive archive unpacker talks to:
//! `unpack(path, password)` yields an [`UnpackTree`] whose `package` is the
//! inferred format tag and whose children are [`Node`]s. The built-in
//! [`ArchiveUnpacker`] handles ZIP (ZipCrypto and AES passwords), TAR, gzip,
//! tar.gz, RAR, 7z and mail attachments (RFC 822 and Outlook `.msg`), and
//! recognises office documents and Java archives without expanding them.

pub(crate) mod guards;
mod mail;
mod rar;
mod sevenz;
mod tar;
pub(crate) mod zip;

use crate::magic::{Classifier, MagicClassifier};
use guards::ExtractionGuard;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Nested containers deeper than this are left as plain files.
pub const MAX_NESTING_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("password required or incorrect")]
    PasswordRequired,

    #[error("unsupported container: {magic}")]
    Unsupported { magic: String },

    #[error("corrupt container: {message}")]
    Corrupt { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded archive member before classification.
#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
}

/// One entry of an unpacked container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File {
        name: String,
        magic: String,
        data: Vec<u8>,
    },
    Container {
        name: String,
        magic: String,
        data: Vec<u8>,
        children: Vec<Node>,
    },
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::File { name, .. } | Node::Container { name, .. } => name,
        }
    }

    pub fn magic(&self) -> &str {
        match self {
            Node::File { magic, .. } | Node::Container { magic, .. } => magic,
        }
    }

    /// Raw bytes of the member itself.
    pub fn data(&self) -> &[u8] {
        match self {
            Node::File { data, .. } | Node::Container { data, .. } => data,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::File { .. } => &[],
            Node::Container { children, .. } => children,
        }
    }
}

/// Result of unpacking one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackTree {
    /// Inferred format tag (`zip`, `jar`, `apk`, `doc`, `xls`, `ppt`, `pub`,
    /// `tar`, `gzip`, `rar`, `7z`, `eml`, `msg`).
    pub package: Option<String>,
    pub children: Vec<Node>,
}

pub trait Unpacker: Send + Sync {
    fn unpack(&self, path: &Path, password: Option<&str>) -> Result<UnpackTree, UnpackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerFormat {
    Zip,
    Tar,
    Gzip,
    Rar,
    SevenZip,
    Email,
    OutlookMessage,
}

impl ContainerFormat {
    fn detect(magic: &str) -> Option<Self> {
        if magic.contains("Zip archive") {
            Some(Self::Zip)
        } else if magic.contains("POSIX tar archive") {
            Some(Self::Tar)
        } else if magic.contains("gzip compressed data") {
            Some(Self::Gzip)
        } else if magic.contains("RAR archive data") {
            Some(Self::Rar)
        } else if magic.contains("7-zip archive data") {
            Some(Self::SevenZip)
        } else if magic.contains("RFC 822 mail") {
            Some(Self::Email)
        } else if magic.contains("Microsoft Outlook Message") {
            Some(Self::OutlookMessage)
        } else {
            None
        }
    }
}

/// Package tag for formats recognised but deliberately not expanded.
fn document_package(magic: &str) -> Option<&'static str> {
    if magic.contains("Java archive") || magic.contains("Java Jar") {
        Some("jar")
    } else if magic.contains("Microsoft Word") || magic.contains("Microsoft Office Word") {
        Some("doc")
    } else if magic.contains("Microsoft Excel") {
        Some("xls")
    } else if magic.contains("Microsoft PowerPoint") {
        Some("ppt")
    } else if magic.contains("Microsoft Publisher") {
        Some("pub")
    } else {
        None
    }
}

/// Built-in unpacker backed by the `zip`, `tar` and `flate2` crates.
#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
    classifier: MagicClassifier,
    max_depth: usize,
}

impl Default for ArchiveUnpacker {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveUnpacker {
    pub fn new() -> Self {
        Self {
            classifier: MagicClassifier::new(),
            max_depth: MAX_NESTING_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn members_of(
        &self,
        format: ContainerFormat,
        data: &[u8],
        name: &str,
        password: Option<&str>,
        guard: &ExtractionGuard,
    ) -> Result<(&'static str, Vec<Member>), UnpackError> {
        match format {
            ContainerFormat::Zip => {
                let members = zip::read_members(data, password, guard)?;
                let is_apk = members.iter().any(|m| m.name == "AndroidManifest.xml")
                    && members.iter().any(|m| m.name == "classes.dex");
                Ok((if is_apk { "apk" } else { "zip" }, members))
            }
            ContainerFormat::Tar => Ok(("tar", tar::read_members(Cursor::new(data), guard)?)),
            ContainerFormat::Gzip => {
                let (original_name, payload) = tar::gunzip(data, guard)?;
                if payload.get(257..262) == Some(b"ustar") {
                    return Ok(("tar", tar::read_members(Cursor::new(payload), guard)?));
                }
                let inner_name = original_name.unwrap_or_else(|| strip_gz_suffix(name));
                Ok((
                    "gzip",
                    vec![Member {
                        name: inner_name,
                        data: payload,
                    }],
                ))
            }
            ContainerFormat::Rar => Ok(("rar", rar::read_members(data, password, guard)?)),
            ContainerFormat::SevenZip => Ok(("7z", sevenz::read_members(data, password, guard)?)),
            ContainerFormat::Email => Ok(("eml", mail::read_email_members(data, guard)?)),
            ContainerFormat::OutlookMessage => Ok(("msg", mail::read_msg_members(data, guard)?)),
        }
    }

    fn build_nodes(
        &self,
        members: Vec<Member>,
        password: Option<&str>,
        guard: &ExtractionGuard,
        depth: usize,
    ) -> Vec<Node> {
        members
            .into_iter()
            .map(|member| {
                let magic = self.classifier.classify_bytes(&member.data);
                let nested = ContainerFormat::detect(&magic).filter(|_| depth < self.max_depth);
                if let Some(format) = nested {
                    match self.members_of(format, &member.data, &member.name, password, guard) {
                        Ok((_, inner)) => {
                            let children = self.build_nodes(inner, password, guard, depth + 1);
                            return Node::Container {
                                name: member.name,
                                magic,
                                data: member.data,
                                children,
                            };
                        }
                        Err(e) => debug!("Nested container {} not expanded: {}", member.name, e),
                    }
                }
                Node::File {
                    name: member.name,
                    magic,
                    data: member.data,
                }
            })
            .collect()
    }
}

fn strip_gz_suffix(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = base.to_ascii_lowercase();
    if lower.ends_with(".gz") && base.len() > 3 {
        base[..base.len() - 3].to_string()
    } else {
        format!("{base}.out")
    }
}

impl Unpacker for ArchiveUnpacker {
    fn unpack(&self, path: &Path, password: Option<&str>) -> Result<UnpackTree, UnpackError> {
        let data = std::fs::read(path)?;
        let magic = self.classifier.classify_bytes(&data);

        let Some(format) = ContainerFormat::detect(&magic) else {
            if let Some(tag) = document_package(&magic) {
                return Ok(UnpackTree {
                    package: Some(tag.to_string()),
                    children: Vec::new(),
                });
            }
            return Err(UnpackError::Unsupported { magic });
        };

        let guard = ExtractionGuard::new();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (package, members) = self.members_of(format, &data, &name, password, &guard)?;
        debug!(
            "Unpacked {} as {} with {} members",
            path.display(),
            package,
            members.len()
        );

        Ok(UnpackTree {
            package: Some(package.to_string()),
            children: self.build_nodes(members, password, &guard, 1),
        })
    }
}
