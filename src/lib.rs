//! Sample triage for malware sandboxes.
//!
//! Turns a raw submission into the file(s) worth detonating and squeezes
//! extra payloads out of installers, packers and obfuscated scripts.
//!
//! # Example
//!
//! ```no_run
//! use triage::demux::Demultiplexer;
//! use triage::TriageConfig;
//! use std::path::Path;
//!
//! let config = TriageConfig::default();
//! let demux = Demultiplexer::new(&config);
//! let candidates = demux
//!     .demux(Path::new("sample.zip"), None, "password=infected", true)
//!     .unwrap();
//!
//! for path in candidates.paths() {
//!     println!("{}", path.display());
//! }
//! ```

mod archive_utils;
mod file_io;
mod process;

pub mod catalogue;
pub mod config;
pub mod demux;
pub mod error;
pub mod extractors;
pub mod identify;
pub mod magic;
pub mod office;
pub mod options;
pub mod static_info;
pub mod unpack;
pub mod zip_package;

pub use catalogue::{Cataloguer, ExtractedFileRecord};
pub use config::TriageConfig;
pub use demux::{CandidateList, Demultiplexer};
pub use error::{Result, TriageError};
pub use magic::{Classifier, MagicClassifier};
pub use options::{resolve_password, TaskOptions};
pub use static_info::{StaticAnalyzer, StaticInfo};
