//! Pipeline configuration.
//!
//! Built once at process start (usually from YAML) and handed to every
//! component constructor. Nothing in the crate reads configuration from
//! globals.

use crate::error::{Result, TriageError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Hard cap on the number of candidates returned by demultiplexing.
pub const MAX_CANDIDATES: usize = 10;

/// Maximum nesting depth for the direct ZIP package path.
pub const MAX_ZIP_DEPTH: usize = 4;

/// Bytes of a text-like file rendered into a record's `data` preview.
pub const TEXT_PREVIEW_BYTES: usize = 8192;

/// Password tried by the archive unpacker when the task supplies none.
pub const DEFAULT_ARCHIVE_PASSWORD: &str = "infected";

/// Top-level configuration for the triage pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriageConfig {
    /// Root for every scratch and staging directory.
    pub tmp_root: PathBuf,
    pub demux: DemuxConfig,
    pub tools: ToolsConfig,
    pub identification: IdentificationConfig,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            tmp_root: std::env::temp_dir(),
            demux: DemuxConfig::default(),
            tools: ToolsConfig::default(),
            identification: IdentificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemuxConfig {
    /// Whether an office decryption backend is installed.
    pub office_decryption: bool,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self { office_decryption: true }
    }
}

/// Enablement and binary location for a single tool-chain entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    pub enabled: bool,
    /// Explicit binary. When absent the tool's default program is looked up on `PATH`.
    pub binary: Option<PathBuf>,
}

impl ToolSettings {
    pub fn enabled() -> Self {
        Self { enabled: true, binary: None }
    }

    pub fn with_binary<P: Into<PathBuf>>(binary: P) -> Self {
        Self { enabled: true, binary: Some(binary.into()) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub msi_extract: ToolSettings,
    pub vbe: ToolSettings,
    pub batch: ToolSettings,
    pub unautoit: ToolSettings,
    pub rar_sfx: ToolSettings,
    pub upx: ToolSettings,
    pub nsis: ToolSettings,
    pub inno_extract: ToolSettings,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            msi_extract: ToolSettings::with_binary("/usr/bin/msiextract"),
            vbe: ToolSettings::enabled(),
            batch: ToolSettings::enabled(),
            unautoit: ToolSettings::disabled(),
            rar_sfx: ToolSettings::with_binary("/usr/bin/unrar"),
            upx: ToolSettings::enabled(),
            nsis: ToolSettings::enabled(),
            inno_extract: ToolSettings::with_binary("/usr/bin/innoextract"),
        }
    }
}

impl ToolsConfig {
    /// Every tool switched off. Handy as a base for targeted setups.
    pub fn none() -> Self {
        Self {
            msi_extract: ToolSettings::disabled(),
            vbe: ToolSettings::disabled(),
            batch: ToolSettings::disabled(),
            unautoit: ToolSettings::disabled(),
            rar_sfx: ToolSettings::disabled(),
            upx: ToolSettings::disabled(),
            nsis: ToolSettings::disabled(),
            inno_extract: ToolSettings::disabled(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentificationConfig {
    pub die: ToolSettings,
    pub trid: TridSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TridSettings {
    pub enabled: bool,
    pub binary: Option<PathBuf>,
    pub definitions: Option<PathBuf>,
}

impl TriageConfig {
    /// Parse a YAML document. Missing sections keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| TriageError::configuration(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            TriageError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Convenience constructor used by tests and embedders.
    pub fn with_tmp_root<P: Into<PathBuf>>(tmp_root: P) -> Self {
        Self { tmp_root: tmp_root.into(), ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tmp_root.as_os_str().is_empty() {
            return Err(TriageError::configuration("tmp_root must not be empty"));
        }
        let trid = &self.identification.trid;
        if trid.enabled && trid.definitions.is_none() {
            return Err(TriageError::configuration(
                "identification.trid is enabled but no definitions file is set",
            ));
        }
        Ok(())
    }

    /// Directory holding materialized archive children.
    pub fn unpack_root(&self) -> PathBuf {
        self.tmp_root.join("triage-unpack")
    }

    /// Fixed staging directory for decrypted office documents.
    pub fn office_staging_dir(&self) -> PathBuf {
        self.tmp_root.join("triage-tmp").join("msoffice-crypt-tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TriageConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.demux.office_decryption);
        assert!(config.tools.batch.enabled);
        assert!(config.tools.vbe.enabled);
        assert!(!config.tools.unautoit.enabled);
    }

    #[test]
    fn test_yaml_overrides_only_named_fields() {
        let yaml = r#"
tmp_root: /var/tmp/triage
tools:
  upx:
    enabled: false
  rar_sfx:
    enabled: true
    binary: /opt/unrar
"#;
        let config = TriageConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.tmp_root, PathBuf::from("/var/tmp/triage"));
        assert!(!config.tools.upx.enabled);
        assert_eq!(config.tools.rar_sfx.binary, Some(PathBuf::from("/opt/unrar")));
        // Untouched sections keep defaults
        assert!(config.tools.batch.enabled);
        assert!(config.demux.office_decryption);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let yaml = "tools:\n  kixtart:\n    enabled: true\n";
        assert!(TriageConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_trid_requires_definitions() {
        let yaml = "identification:\n  trid:\n    enabled: true\n    binary: /opt/trid\n";
        let err = TriageConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TriageError::Configuration { .. }));
    }

    #[test]
    fn test_empty_tmp_root_rejected() {
        let config = TriageConfig { tmp_root: PathBuf::new(), ..TriageConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_directories() {
        let config = TriageConfig::with_tmp_root("/scratch");
        assert_eq!(config.unpack_root(), PathBuf::from("/scratch/triage-unpack"));
        assert_eq!(
            config.office_staging_dir(),
            PathBuf::from("/scratch/triage-tmp/msoffice-crypt-tmp")
        );
    }
}
