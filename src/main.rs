use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use forkbench::chaos::{ChaosAction, RecoveryTarget};
use forkbench::cli::{Cli, Commands, Display, OutputFormat, parse_filter};
use forkbench::config::RunnerConfig;
use forkbench::error::{BenchError, Result};
use forkbench::manifest::Manifest;
use forkbench::orchestrator::{OperationReport, Orchestrator};
use forkbench::output::OutputWriter;
use forkbench::platform::DriverPlatform;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(report) if report.succeeded() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("forkbench=debug")
    } else {
        EnvFilter::new("forkbench=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<OperationReport> {
    let display = Display::new();
    let writer = OutputWriter::new(cli.output);

    // init runs before any manifest exists.
    if matches!(cli.command, Commands::Init) {
        let report = forkbench::orchestrator::init(Path::new(".")).await?;
        if writer.format() == OutputFormat::Text {
            display.print_verdict(&report);
        }
        writer.emit_report(&report);
        return Ok(report);
    }

    let manifest_path = cli
        .manifest
        .unwrap_or_else(|| PathBuf::from("forkbench.yaml"));
    let raw = tokio::fs::read_to_string(&manifest_path).await.map_err(|e| {
        BenchError::Config(format!("cannot read {}: {}", manifest_path.display(), e))
    })?;
    let manifest = Manifest::parse(&raw)?;

    let config_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let mut config = RunnerConfig::load(config_dir).await?;

    if let Commands::Test {
        prefix: Some(prefix),
        ..
    } = &cli.command
    {
        config.branch_prefix = prefix.clone();
    }

    if writer.format() == OutputFormat::Text {
        display.print_header(&format!("forkbench · {}", manifest.name));
    }

    let orchestrator = Orchestrator::new(Arc::new(DriverPlatform::from_env()), manifest, config);

    let report = match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Validate => orchestrator.validate()?,
        Commands::Up { services } => orchestrator.up(&services).await?,
        Commands::Down { services } => orchestrator.down(&services).await?,
        Commands::Test {
            suites, parallel, ..
        } => orchestrator.test(&suites, parallel).await?,
        Commands::Matrix {
            suite,
            filter,
            continue_on_failure,
        } => {
            let filter = parse_filter(&filter)?;
            orchestrator.matrix(&suite, &filter, continue_on_failure).await?
        }
        Commands::Deploy { target } => orchestrator.deploy(&target).await?,
        Commands::Chaos {
            service,
            action,
            duration,
            intensity,
        } => {
            let action = ChaosAction {
                service,
                kind: action.into(),
                duration: duration.map(Duration::from_secs),
                intensity,
            };
            orchestrator.chaos(&action).await?
        }
        Commands::Recover {
            checkpoint,
            service,
        } => {
            let target = match (checkpoint, service) {
                (Some(tag), _) => RecoveryTarget::Checkpoint(tag),
                (None, Some(name)) => RecoveryTarget::Service(name),
                // clap enforces exactly one of the two.
                (None, None) => {
                    return Err(BenchError::Config(
                        "recover needs --checkpoint or --service".to_string(),
                    ));
                }
            };
            orchestrator.recover(&target).await?
        }
    };

    if writer.format() == OutputFormat::Text {
        display.print_verdict(&report);
    }
    writer.emit_report(&report);

    Ok(report)
}
