//! Sample demultiplexing.
//!
//! Reduces a submitted artifact to the file(s) that should actually be
//! analysed: decrypted office documents, members of archives, or the
//! artifact itself when it is already final.

pub mod archive;

use crate::config::{TriageConfig, MAX_CANDIDATES};
use crate::error::Result;
use crate::magic::{Classifier, MagicClassifier};
use crate::office::{decrypt_office, CfbOfficeDecryptor, OfficeDecryptor};
use crate::options::resolve_password;
use crate::unpack::Unpacker;
use archive::{RecursiveUnpacker, VALID_LINUX_TYPES};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Types returned untouched: executables and Java archives are never unpacked.
const TERMINAL_TYPES: &[&str] = &["Java Jar", "Java archive", "PE32", "MS-DOS executable"];

/// Ordered, non-empty list of at most [`MAX_CANDIDATES`] paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CandidateList(Vec<PathBuf>);

impl CandidateList {
    pub fn single<P: Into<PathBuf>>(path: P) -> Self {
        Self(vec![path.into()])
    }

    /// Keep the first [`MAX_CANDIDATES`] results, or fall back to `original`.
    pub fn from_results(mut results: Vec<PathBuf>, original: &Path) -> Self {
        if results.is_empty() {
            return Self::single(original);
        }
        results.truncate(MAX_CANDIDATES);
        Self(results)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whether a descriptor marks an encrypted office container.
pub fn is_encrypted_office(magic: &str) -> bool {
    magic.contains("CDFV2 Encrypted")
        || (magic.contains("Composite Document File") && magic.contains("Encrypted"))
}

/// Whether a descriptor denotes a type that is analysed as-is.
pub fn is_terminal_type(magic: &str) -> bool {
    TERMINAL_TYPES
        .iter()
        .chain(VALID_LINUX_TYPES)
        .any(|t| magic.contains(t))
}

pub struct Demultiplexer {
    classifier: Arc<dyn Classifier>,
    unpacker: RecursiveUnpacker,
    office_decryptor: Option<Box<dyn OfficeDecryptor>>,
    staging_dir: PathBuf,
}

impl Demultiplexer {
    pub fn new(config: &TriageConfig) -> Self {
        let office_decryptor: Option<Box<dyn OfficeDecryptor>> = if config.demux.office_decryption
        {
            Some(Box::new(CfbOfficeDecryptor))
        } else {
            None
        };
        Self {
            classifier: Arc::new(MagicClassifier::new()),
            unpacker: RecursiveUnpacker::new(config),
            office_decryptor,
            staging_dir: config.office_staging_dir(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_unpacker(mut self, unpacker: Box<dyn Unpacker>) -> Self {
        self.unpacker = self.unpacker.with_unpacker(unpacker);
        self
    }

    /// Replace the office backend; `None` means no decoder is installed.
    pub fn with_office_decryptor(mut self, decryptor: Option<Box<dyn OfficeDecryptor>>) -> Self {
        self.office_decryptor = decryptor;
        self
    }

    /// Demultiplex one submission.
    ///
    /// Only fails with [`TriageError::DecoderUnavailable`] when an encrypted
    /// office document arrives and no decoder is installed; every other
    /// problem degrades to returning the artifact itself.
    ///
    /// [`TriageError::DecoderUnavailable`]: crate::error::TriageError::DecoderUnavailable
    pub fn demux(
        &self,
        artifact: &Path,
        explicit_package: Option<&str>,
        options: &str,
        allow_deep_unpack: bool,
    ) -> Result<CandidateList> {
        if let Some(package) = explicit_package.filter(|p| !p.is_empty()) {
            debug!("Package {} chosen explicitly for {}", package, artifact.display());
            return Ok(CandidateList::single(artifact));
        }

        let magic = self.classifier.classify(artifact);
        debug!("Demuxing {} ({})", artifact.display(), magic);

        if is_encrypted_office(&magic) {
            let password = resolve_password(options);
            let decoded = decrypt_office(
                artifact,
                password.as_deref(),
                self.office_decryptor.as_deref(),
                self.classifier.as_ref(),
                &self.staging_dir,
            )?;
            return Ok(CandidateList::single(decoded));
        }

        if is_terminal_type(&magic) {
            return Ok(CandidateList::single(artifact));
        }

        if !allow_deep_unpack {
            return Ok(CandidateList::single(artifact));
        }

        let results = self.unpacker.unpack_archive(artifact, options, 0);
        if results.len() > MAX_CANDIDATES {
            info!(
                "{} yielded {} candidates, keeping the first {}",
                artifact.display(),
                results.len(),
                MAX_CANDIDATES
            );
        }
        Ok(CandidateList::from_results(results, artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_list_bounds() {
        let original = Path::new("/s/orig.zip");
        assert_eq!(
            CandidateList::from_results(Vec::new(), original).paths(),
            &[PathBuf::from("/s/orig.zip")]
        );
        let many: Vec<PathBuf> = (0..25).map(|i| PathBuf::from(format!("/x/{i}.exe"))).collect();
        let list = CandidateList::from_results(many, original);
        assert_eq!(list.len(), MAX_CANDIDATES);
        assert_eq!(list.paths()[0], PathBuf::from("/x/0.exe"));
        assert_eq!(list.paths()[9], PathBuf::from("/x/9.exe"));
    }

    #[test]
    fn test_office_routing() {
        assert!(is_encrypted_office("CDFV2 Encrypted"));
        assert!(!is_encrypted_office(
            "Composite Document File V2 Document, Microsoft Office Word"
        ));
        assert!(!is_encrypted_office("CDFV2 Microsoft Outlook Message"));
    }

    #[test]
    fn test_terminal_types() {
        assert!(is_terminal_type("PE32+ executable (console) x86-64, for MS Windows"));
        assert!(is_terminal_type("MS-DOS executable"));
        assert!(is_terminal_type("Java archive data (JAR)"));
        assert!(is_terminal_type("ELF 64-bit LSB executable"));
        assert!(is_terminal_type("POSIX shell script, ASCII text executable"));
        assert!(!is_terminal_type("Zip archive data, at least v2.0 to extract"));
    }

    #[test]
    fn test_encrypted_office_demuxes_to_staged_copy() {
        use crate::office::tests::{agile_encrypt, sample_plaintext};

        let dir = tempfile::TempDir::new().unwrap();
        let config = TriageConfig::with_tmp_root(dir.path());
        let doc = dir.path().join("invoice.docx");
        std::fs::write(&doc, agile_encrypt(&sample_plaintext(), "secret123", 10)).unwrap();
        let demux = Demultiplexer::new(&config);

        let list = demux.demux(&doc, None, "password=secret123", true).unwrap();
        let staged = dir
            .path()
            .join("triage-tmp")
            .join("msoffice-crypt-tmp")
            .join("invoice.docx");
        assert_eq!(list.paths(), &[staged.clone()]);
        assert_eq!(std::fs::read(&staged).unwrap(), sample_plaintext());

        let list = demux.demux(&doc, None, "password=wrong", true).unwrap();
        assert_eq!(list.paths(), &[doc]);
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let list = CandidateList::single("/s/a.exe");
        assert_eq!(serde_json::to_string(&list).unwrap(), r#"["/s/a.exe"]"#);
    }
}
