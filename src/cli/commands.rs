use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::chaos::ChaosKind;
use crate::error::{BenchError, Result};

#[derive(Parser)]
#[command(name = "forkbench")]
#[command(author, version, about = "Branch-isolated integration test runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Path to the manifest (default: forkbench.yaml)
    #[arg(long, global = true, env = "FORKBENCH_MANIFEST")]
    pub manifest: Option<PathBuf>,
}

/// How operation reports land on stdout: plain text (default), one JSON
/// object, or NDJSON lines.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Stream,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter manifest and runner config in the current directory
    Init,

    /// Parse and validate the manifest without touching the platform
    Validate,

    /// Start services in dependency order
    Up {
        /// Services to start (all if not specified)
        services: Vec<String>,
    },

    /// Stop services in reverse dependency order
    Down {
        /// Services to stop (all if not specified)
        services: Vec<String>,
    },

    /// Run test suites, each scenario in its own fork of one baseline
    Test {
        /// Suites to run (all if not specified)
        suites: Vec<String>,

        /// Run scenarios concurrently even if no suite asks for it
        #[arg(long)]
        parallel: bool,

        /// Override the branch alias prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Run one suite across the version matrix
    Matrix {
        /// Suite to run per combination
        suite: String,

        /// Pin a dimension to one value (dim=value, repeatable)
        #[arg(long = "filter", value_name = "DIM=VALUE")]
        filter: Vec<String>,

        /// Visit every combination instead of stopping at the first failure
        #[arg(long)]
        continue_on_failure: bool,
    },

    /// Bring up a deploy target and run its post-deploy command
    Deploy {
        /// Target name from the manifest's deploy section
        target: String,
    },

    /// Inject a failure into a service (a recovery checkpoint is committed first)
    Chaos {
        /// Service to disrupt
        service: String,

        /// Kind of disruption
        #[arg(value_enum)]
        action: ChaosKindArg,

        /// Bounded window in seconds for isolate/stress actions
        #[arg(long)]
        duration: Option<u64>,

        /// Stress intensity, 0-100
        #[arg(long)]
        intensity: Option<u8>,
    },

    /// Undo chaos by checkpoint rollback or per-service restart
    Recover {
        /// Roll the whole environment back to this checkpoint tag
        #[arg(long, conflicts_with = "service", required_unless_present = "service")]
        checkpoint: Option<String>,

        /// Restart just this service and re-poll its health
        #[arg(long)]
        service: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ChaosKindArg {
    Kill,
    Pause,
    NetworkIsolate,
    CpuStress,
    MemoryStress,
    DiskFill,
}

impl From<ChaosKindArg> for ChaosKind {
    fn from(arg: ChaosKindArg) -> Self {
        match arg {
            ChaosKindArg::Kill => ChaosKind::Kill,
            ChaosKindArg::Pause => ChaosKind::Pause,
            ChaosKindArg::NetworkIsolate => ChaosKind::NetworkIsolate,
            ChaosKindArg::CpuStress => ChaosKind::CpuStress,
            ChaosKindArg::MemoryStress => ChaosKind::MemoryStress,
            ChaosKindArg::DiskFill => ChaosKind::DiskFill,
        }
    }
}

/// Parse repeated `--filter dim=value` arguments into a map.
pub fn parse_filter(raw: &[String]) -> Result<indexmap::IndexMap<String, String>> {
    let mut filter = indexmap::IndexMap::new();
    for entry in raw {
        let (dim, value) = entry.split_once('=').ok_or_else(|| {
            BenchError::validation(format!("filter '{}' is not of the form dim=value", entry))
        })?;
        filter.insert(dim.trim().to_string(), value.trim().to_string());
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_entries_parse_into_a_map() {
        let filter =
            parse_filter(&["postgres=15".to_string(), "redis = 7".to_string()]).unwrap();
        assert_eq!(filter.get("postgres").map(String::as_str), Some("15"));
        assert_eq!(filter.get("redis").map(String::as_str), Some("7"));
    }

    #[test]
    fn filter_without_equals_is_rejected() {
        assert!(parse_filter(&["postgres".to_string()]).is_err());
    }

    #[test]
    fn cli_parses_a_matrix_invocation() {
        let cli = Cli::try_parse_from([
            "forkbench",
            "matrix",
            "checkout",
            "--filter",
            "redis=7",
            "--continue-on-failure",
            "-o",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Matrix {
                suite,
                filter,
                continue_on_failure,
            } => {
                assert_eq!(suite, "checkout");
                assert_eq!(filter, vec!["redis=7".to_string()]);
                assert!(continue_on_failure);
            }
            _ => panic!("expected matrix subcommand"),
        }
    }

    #[test]
    fn recover_requires_a_target() {
        assert!(Cli::try_parse_from(["forkbench", "recover"]).is_err());
        assert!(
            Cli::try_parse_from(["forkbench", "recover", "--checkpoint", "t", "--service", "s"])
                .is_err()
        );
    }
}
