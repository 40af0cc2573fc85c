use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "triage")]
#[command(about = "Sample triage for malware sandboxes: demultiplex submissions and unpack installers")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json, terminal)
    #[arg(short, long, default_value = "json", global = true)]
    pub format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reduce a submission to the file(s) that should be analysed
    Demux {
        /// Submitted artifact
        artifact: PathBuf,

        /// Analysis package chosen by the submitter; skips demultiplexing
        #[arg(long)]
        package: Option<String>,

        /// Task options string, e.g. "password=abc,file=run.exe"
        #[arg(long, default_value = "")]
        options: String,

        /// Only handle office documents, never unpack archives
        #[arg(long)]
        no_unpack: bool,
    },

    /// Extract a ZIP package (and nested ZIPs) and print the chosen target
    Unzip {
        /// ZIP archive
        archive: PathBuf,

        /// Extraction directory
        #[arg(short, long)]
        dest: PathBuf,

        /// Task options string, e.g. "password=abc,file=run.exe"
        #[arg(long, default_value = "")]
        options: String,
    },

    /// Describe a file and run the extraction tool chain over it
    Extract {
        /// File to inspect
        artifact: PathBuf,

        /// Where produced files are stored, named by SHA-256
        #[arg(short, long)]
        dest: PathBuf,

        /// Name of a signature that matched the task (repeatable)
        #[arg(long = "signature")]
        signatures: Vec<String>,
    },
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output for machine consumption
    Json,
    /// Human-readable terminal output
    Terminal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_demux() {
        let args = Args::parse_from([
            "triage",
            "demux",
            "/s/sample.zip",
            "--options",
            "password=abc",
            "--no-unpack",
        ]);
        match args.command {
            Command::Demux { artifact, options, no_unpack, package } => {
                assert_eq!(artifact, PathBuf::from("/s/sample.zip"));
                assert_eq!(options, "password=abc");
                assert!(no_unpack);
                assert!(package.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(args.format, OutputFormat::Json));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "triage",
            "extract",
            "a.bat",
            "-d",
            "/out",
            "--signature",
            "AutoIT_Compiled",
            "--config",
            "/etc/triage.yaml",
            "-v",
        ]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/etc/triage.yaml")));
        match args.command {
            Command::Extract { signatures, .. } => assert_eq!(signatures, ["AutoIT_Compiled"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
