//! Optional third-party identification (Detect It Easy, TrID).
//!
//! Both identifiers are best-effort: a missing binary or a failing run
//! leaves the corresponding field unset.

use crate::config::{IdentificationConfig, ToolSettings};
use crate::process::{resolve_binary, run_tool};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct DieReport {
    #[serde(default)]
    detects: Option<Vec<DieDetect>>,
}

#[derive(Debug, Deserialize)]
struct DieDetect {
    #[serde(default)]
    values: Vec<DieValue>,
}

#[derive(Debug, Deserialize)]
struct DieValue {
    string: String,
}

/// Collect every `detects[].values[].string` from `diec -j` output.
pub fn parse_die_json(output: &str) -> Vec<String> {
    if !output.contains("detects") {
        return Vec::new();
    }
    // diec may print warnings before the JSON document
    let json = output.find('{').map_or(output, |start| &output[start..]);
    match serde_json::from_str::<DieReport>(json) {
        Ok(report) => report
            .detects
            .unwrap_or_default()
            .into_iter()
            .flat_map(|d| d.values)
            .map(|v| v.string)
            .collect(),
        Err(e) => {
            warn!("Unparseable Detect It Easy output: {}", e);
            Vec::new()
        }
    }
}

/// TrID prints a six-line banner and a trailing newline around its matches.
pub fn parse_trid_output(output: &str) -> Vec<String> {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() <= 7 {
        return Vec::new();
    }
    lines[6..lines.len() - 1].iter().map(|l| l.to_string()).collect()
}

#[derive(Debug, Clone, Default)]
pub struct Identifier {
    die: Option<PathBuf>,
    trid: Option<(PathBuf, PathBuf)>,
}

impl Identifier {
    pub fn new(config: &IdentificationConfig) -> Self {
        let die = if config.die.enabled {
            resolve_binary("DIE", &config.die, "diec")
        } else {
            None
        };

        let trid = if config.trid.enabled {
            let settings = ToolSettings {
                enabled: true,
                binary: config.trid.binary.clone(),
            };
            resolve_binary("TrID", &settings, "trid").zip(config.trid.definitions.clone())
        } else {
            None
        };

        Self { die, trid }
    }

    /// No identifier configured.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Detect It Easy strings, or `None` when unavailable or empty.
    pub fn die(&self, path: &Path) -> Option<Vec<String>> {
        let binary = self.die.as_ref()?;
        let args: [OsString; 2] = ["-j".into(), path.as_os_str().to_owned()];
        match run_tool(binary, args) {
            Ok(output) => Some(parse_die_json(&output)).filter(|s| !s.is_empty()),
            Err(e) => {
                warn!("Detect It Easy failed on {}: {:#}", path.display(), e);
                None
            }
        }
    }

    /// TrID match lines, or `None` when unavailable.
    pub fn trid(&self, path: &Path) -> Option<Vec<String>> {
        let (binary, definitions) = self.trid.as_ref()?;
        let mut definitions_arg = OsString::from("-d:");
        definitions_arg.push(definitions);
        let args = [definitions_arg, path.as_os_str().to_owned()];
        match run_tool(binary, args) {
            Ok(output) => Some(parse_trid_output(&output)),
            Err(e) => {
                warn!("TrID failed on {}: {:#}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_die_json() {
        let output = r#"{
    "detects": [
        {
            "filetype": "PE32",
            "values": [
                {"info": "", "name": "Inno Setup", "string": "Installer: Inno Setup Module(5.5.0)", "type": "Installer"},
                {"info": "", "name": "Borland Delphi", "string": "Compiler: Borland Delphi(2.0)", "type": "Compiler"}
            ]
        }
    ]
}"#;
        assert_eq!(
            parse_die_json(output),
            vec!["Installer: Inno Setup Module(5.5.0)", "Compiler: Borland Delphi(2.0)"]
        );
    }

    #[test]
    fn test_parse_die_json_without_detects() {
        assert!(parse_die_json("error: cannot open file").is_empty());
        assert!(parse_die_json(r#"{"detects": null}"#).is_empty());
    }

    #[test]
    fn test_parse_trid_output() {
        let output = "\nTrID/32 - File Identifier v2.24 - (C) 2003-16 By M.Pontello\nDefinitions found:  15000\nAnalyzing...\n\nCollecting data from file: a.exe\n 49.1% (.EXE) Win32 Executable (generic) (4505/5/1)\n 21.8% (.EXE) Generic Win/DOS Executable (2002/3)\n";
        assert_eq!(
            parse_trid_output(output),
            vec![
                " 49.1% (.EXE) Win32 Executable (generic) (4505/5/1)",
                " 21.8% (.EXE) Generic Win/DOS Executable (2002/3)"
            ]
        );
        assert!(parse_trid_output("short\noutput\n").is_empty());
    }

    #[test]
    fn test_disabled_identifier_reports_nothing() {
        let id = Identifier::disabled();
        assert_eq!(id.die(Path::new("/bin/sh")), None);
        assert_eq!(id.trid(Path::new("/bin/sh")), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_die_with_fake_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let bin = dir.path().join("diec");
        std::fs::write(
            &bin,
            "#!/bin/sh\necho '{\"detects\":[{\"values\":[{\"string\":\"Packer: UPX(3.96)\"}]}]}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = IdentificationConfig {
            die: ToolSettings::with_binary(&bin),
            ..IdentificationConfig::default()
        };
        let id = Identifier::new(&config);
        assert_eq!(id.die(&bin), Some(vec!["Packer: UPX(3.96)".to_string()]));
    }
}
