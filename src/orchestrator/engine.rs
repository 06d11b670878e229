use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::chaos::{ChaosAction, ChaosDefaults, ChaosInjector, RecoveryTarget};
use crate::config::RunnerConfig;
use crate::error::{BenchError, Result};
use crate::executor::{ExecutePlan, ScenarioRunner, TestStatus};
use crate::launcher::{DependencyGraph, ServiceLauncher};
use crate::manifest::{Manifest, TestSuite};
use crate::matrix::MatrixRunner;
use crate::platform::{ExecContext, Platform};
use crate::report;

/// Overall verdict of one orchestrator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Ok,
    Partial,
    Failed,
}

/// Serializable outcome of a single operation: a coarse status, a
/// human-readable summary, and the structured detail behind it.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: String,
    pub status: OperationStatus,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl OperationReport {
    fn new(operation: &str, status: OperationStatus, summary: String) -> Self {
        Self {
            operation: operation.to_string(),
            status,
            summary,
            detail: None,
        }
    }

    fn with_detail<T: Serialize>(mut self, detail: &T) -> Result<Self> {
        self.detail = Some(serde_json::to_value(detail)?);
        Ok(self)
    }

    pub fn succeeded(&self) -> bool {
        self.status == OperationStatus::Ok
    }
}

/// Scaffold a starter manifest and runner config in `dir`. Existing files
/// are left untouched.
pub async fn init(dir: &std::path::Path) -> Result<OperationReport> {
    let manifest_path = dir.join("forkbench.yaml");
    if manifest_path.exists() {
        return Ok(OperationReport::new(
            "init",
            OperationStatus::Ok,
            format!("{} already exists, nothing to do", manifest_path.display()),
        ));
    }

    tokio::fs::write(&manifest_path, STARTER_MANIFEST).await?;
    RunnerConfig::default().save(dir).await?;
    info!(path = %manifest_path.display(), "Starter manifest written");

    Ok(OperationReport::new(
        "init",
        OperationStatus::Ok,
        format!(
            "wrote {} and {}",
            manifest_path.display(),
            dir.join("forkbench.toml").display()
        ),
    ))
}

const STARTER_MANIFEST: &str = r#"name: my-environment
vm:
  cpus: 2
  memory_mb: 2048
  disk_gb: 20
services:
  postgres:
    template: postgres@15
    healthcheck:
      command: pg_isready
      interval_ms: 1000
      retries: 5
tests:
  smoke:
    command: echo ok
    depends_on: [postgres]
"#;

/// Drives a parsed manifest against a platform. One instance per run; the
/// manifest is read-only for the instance's lifetime.
pub struct Orchestrator {
    platform: Arc<dyn Platform>,
    manifest: Manifest,
    config: RunnerConfig,
}

impl Orchestrator {
    pub fn new(platform: Arc<dyn Platform>, manifest: Manifest, config: RunnerConfig) -> Self {
        Self {
            platform,
            manifest,
            config,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Structural validation beyond what `Manifest::parse` already enforced:
    /// the service dependency graph must be acyclic.
    pub fn validate(&self) -> Result<OperationReport> {
        let graph = DependencyGraph::build(&self.manifest);
        graph.topo_order()?;

        let summary = format!(
            "manifest '{}' valid: {} services, {} suites, {} matrix dimensions, {} deploy targets",
            self.manifest.name,
            self.manifest.services.len(),
            self.manifest.tests.len(),
            self.manifest.matrix.len(),
            self.manifest.deploy.len(),
        );
        Ok(OperationReport::new("validate", OperationStatus::Ok, summary))
    }

    /// Bring up the named services (empty = all) in dependency order.
    /// Partial failures surface as `Partial`, never as an `Err`.
    pub async fn up(&self, services: &[String]) -> Result<OperationReport> {
        let launcher = ServiceLauncher::new(self.platform.clone(), &self.manifest);

        let tag = format!(
            "{}-up-{}",
            self.config.branch_prefix,
            Utc::now().format("%Y%m%dT%H%M%S")
        );
        let checkpoint_tag = self.config.checkpoint_on_up.then_some(tag.as_str());

        let report = launcher.start(services, checkpoint_tag).await?;

        if report.all_healthy() {
            for declared in &self.manifest.checkpoints {
                let reference = self
                    .platform
                    .commit(declared, Some("declared checkpoint"))
                    .await?;
                info!(tag = %declared, id = %reference.id, "Committed declared checkpoint");
            }
        } else {
            warn!(
                failed = ?report.failed(),
                "Skipping declared checkpoints after partial startup"
            );
        }

        let failed = report.failed();
        let status = if failed.is_empty() {
            OperationStatus::Ok
        } else if failed.len() < report.outcomes.len() {
            OperationStatus::Partial
        } else {
            OperationStatus::Failed
        };
        let summary = if failed.is_empty() {
            format!("{} services healthy", report.outcomes.len())
        } else {
            format!(
                "{} of {} services failed: {}",
                failed.len(),
                report.outcomes.len(),
                failed.join(", ")
            )
        };

        OperationReport::new("up", status, summary).with_detail(&report)
    }

    /// Stop the named services (empty = all) in reverse dependency order.
    pub async fn down(&self, services: &[String]) -> Result<OperationReport> {
        let launcher = ServiceLauncher::new(self.platform.clone(), &self.manifest);
        let stopped = launcher.stop(services).await?;

        let summary = format!("{} services stopped", stopped.len());
        OperationReport::new("down", OperationStatus::Ok, summary).with_detail(&stopped)
    }

    /// Run the named suites (empty = all, declaration order), each scenario
    /// in its own fork of one baseline checkpoint.
    pub async fn test(&self, suites: &[String], parallel: bool) -> Result<OperationReport> {
        let selected = self.select_suites(suites)?;
        let plan = ExecutePlan {
            // Any suite asking for parallelism turns the whole run parallel.
            parallel: parallel || selected.iter().any(|(_, s)| s.parallel),
            branch_prefix: self.config.branch_prefix.clone(),
            max_parallel: self.config.max_parallel_scenarios,
        };

        let runner = ScenarioRunner::new(self.platform.clone());
        let results = runner.execute(&selected, &plan).await?;
        self.discard_passed_branches(&plan.branch_prefix, &results)
            .await;
        let summary = report::summarize(&results);

        let status = run_status(results.iter().map(|r| r.status), false);
        let rendered = report::render(&results, &summary);
        OperationReport::new("test", status, rendered).with_detail(&serde_json::json!({
            "results": results,
            "summary": summary,
        }))
    }

    /// Run one suite across the version matrix, one combination at a time.
    pub async fn matrix(
        &self,
        suite: &str,
        filter: &IndexMap<String, String>,
        continue_on_failure: bool,
    ) -> Result<OperationReport> {
        let plan = ExecutePlan {
            parallel: false,
            branch_prefix: self.config.branch_prefix.clone(),
            max_parallel: self.config.max_parallel_scenarios,
        };

        let runner = MatrixRunner::new(self.platform.clone(), &self.manifest);
        let outcome = runner.run(suite, filter, continue_on_failure, &plan).await?;
        self.discard_passed_branches(&plan.branch_prefix, &outcome.results)
            .await;
        let summary = report::summarize(&outcome.results);

        let status = run_status(
            outcome.results.iter().map(|r| r.status),
            outcome.short_circuited,
        );
        let mut rendered = report::render(&outcome.results, &summary);
        if outcome.short_circuited {
            rendered.push_str(&format!(
                "\nstopped after {} of {} combinations",
                outcome.results.len(),
                outcome.combinations
            ));
        }
        OperationReport::new("matrix", status, rendered).with_detail(&outcome)
    }

    /// Bring up a deploy target's service subset, checkpoint, and run its
    /// post-deploy command.
    pub async fn deploy(&self, target: &str) -> Result<OperationReport> {
        let spec = self
            .manifest
            .deploy
            .get(target)
            .ok_or_else(|| BenchError::UnknownTarget(target.to_string()))?
            .clone();

        let launcher = ServiceLauncher::new(self.platform.clone(), &self.manifest);
        let start = launcher.start(&spec.services, None).await?;
        if !start.all_healthy() {
            let failed = start.failed();
            let summary = format!(
                "deploy '{}' aborted, unhealthy services: {}",
                target,
                failed.join(", ")
            );
            return OperationReport::new("deploy", OperationStatus::Failed, summary)
                .with_detail(&start);
        }

        let tag = format!("deploy-{}-{}", target, Utc::now().format("%Y%m%dT%H%M%S"));
        let checkpoint = self.platform.commit(&tag, Some("deploy")).await?;
        info!(target = %target, tag = %tag, "Deploy checkpoint committed");

        if let Some(command) = &spec.command {
            let ctx = ExecContext::baseline();
            let output = self
                .platform
                .execute(&ctx, command, &IndexMap::new())
                .await?;
            if !output.success() {
                let summary = format!(
                    "deploy '{}' command exited {}: {}",
                    target,
                    output.exit_code,
                    output.stderr.trim()
                );
                return OperationReport::new("deploy", OperationStatus::Failed, summary)
                    .with_detail(&output);
            }
        }

        let summary = format!("deploy '{}' complete (checkpoint {})", target, checkpoint.tag);
        OperationReport::new("deploy", OperationStatus::Ok, summary).with_detail(&checkpoint)
    }

    /// Inject one chaos action, preceded by its recovery checkpoint.
    pub async fn chaos(&self, action: &ChaosAction) -> Result<OperationReport> {
        let injector = self.injector();
        let report = injector.inject(action).await?;

        let summary = format!(
            "{} injected into '{}' (recover with checkpoint '{}')",
            report.kind, report.service, report.checkpoint_tag
        );
        OperationReport::new("chaos", OperationStatus::Ok, summary).with_detail(&report)
    }

    /// Undo chaos, either by whole-environment rollback or by restarting a
    /// single service.
    pub async fn recover(&self, target: &RecoveryTarget) -> Result<OperationReport> {
        let injector = self.injector();
        injector.recover(target).await?;

        let summary = match target {
            RecoveryTarget::Checkpoint(tag) => format!("rolled back to checkpoint '{}'", tag),
            RecoveryTarget::Service(name) => format!("service '{}' restarted and healthy", name),
        };
        Ok(OperationReport::new("recover", OperationStatus::Ok, summary))
    }

    /// Passed scenarios have nothing left to inspect; their branches are
    /// discarded best-effort. Failed and errored branches stay around.
    async fn discard_passed_branches(&self, prefix: &str, results: &[crate::executor::TestResult]) {
        for result in results {
            if result.status != TestStatus::Passed {
                continue;
            }
            let alias = format!("{}-{}-{}", prefix, result.suite, result.scenario);
            if let Err(e) = self.platform.delete_branch(&alias).await {
                warn!(alias = %alias, error = %e, "Branch cleanup failed");
            }
        }
    }

    fn injector(&self) -> ChaosInjector {
        ChaosInjector::new(self.platform.clone(), &self.manifest).with_defaults(ChaosDefaults {
            intensity: self.config.chaos.default_intensity,
            duration: Duration::from_secs(self.config.chaos.default_duration_secs),
        })
    }

    fn select_suites(&self, names: &[String]) -> Result<Vec<(String, TestSuite)>> {
        if names.is_empty() {
            return Ok(self
                .manifest
                .tests
                .iter()
                .map(|(name, suite)| (name.clone(), suite.clone()))
                .collect());
        }
        names
            .iter()
            .map(|name| {
                self.manifest
                    .tests
                    .get(name)
                    .map(|suite| (name.clone(), suite.clone()))
                    .ok_or_else(|| BenchError::UnknownSuite(name.clone()))
            })
            .collect()
    }
}

fn run_status(statuses: impl Iterator<Item = TestStatus>, short_circuited: bool) -> OperationStatus {
    let mut total = 0usize;
    let mut passed = 0usize;
    for status in statuses {
        total += 1;
        if status == TestStatus::Passed {
            passed += 1;
        }
    }
    if total == passed && !short_circuited {
        OperationStatus::Ok
    } else if passed > 0 {
        OperationStatus::Partial
    } else {
        OperationStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimPlatform;

    fn manifest() -> Manifest {
        Manifest::parse(
            r#"
name: shop
vm: {cpus: 2, memory_mb: 2048, disk_gb: 20}
services:
  postgres:
    template: postgres@15
    healthcheck: {command: pg_isready, interval_ms: 10, retries: 2}
  api:
    template: nginx@1.25
    depends_on: [postgres]
tests:
  smoke:
    command: run-smoke
deploy:
  staging:
    services: [api]
    command: announce-deploy
"#,
        )
        .unwrap()
    }

    fn orchestrator(platform: Arc<SimPlatform>) -> Orchestrator {
        Orchestrator::new(platform, manifest(), RunnerConfig::default())
    }

    #[test]
    fn validate_reports_counts() {
        let report = orchestrator(Arc::new(SimPlatform::new()))
            .validate()
            .unwrap();
        assert_eq!(report.status, OperationStatus::Ok);
        assert!(report.summary.contains("2 services"));
        assert!(report.summary.contains("1 suites"));
    }

    #[tokio::test]
    async fn up_then_down_round_trips() {
        let platform = Arc::new(SimPlatform::new());
        let orch = orchestrator(platform.clone());

        let up = orch.up(&[]).await.unwrap();
        assert_eq!(up.status, OperationStatus::Ok);

        let down = orch.down(&[]).await.unwrap();
        assert_eq!(down.status, OperationStatus::Ok);
        assert!(down.summary.contains("2 services stopped"));
    }

    #[tokio::test]
    async fn up_with_every_service_failed_reports_failed() {
        let platform = Arc::new(SimPlatform::new());
        platform.script_health_ramp("postgres", u32::MAX);
        let orch = orchestrator(platform);

        let up = orch.up(&[]).await.unwrap();
        assert_eq!(up.status, OperationStatus::Failed);
        assert!(up.summary.contains("postgres"));
    }

    #[tokio::test]
    async fn test_runs_selected_suite() {
        let platform = Arc::new(SimPlatform::new());
        let orch = orchestrator(platform);

        let report = orch.test(&["smoke".to_string()], false).await.unwrap();
        assert_eq!(report.status, OperationStatus::Ok);
        assert!(report.summary.contains("PASS"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_suite() {
        let orch = orchestrator(Arc::new(SimPlatform::new()));
        let err = orch.test(&["nope".to_string()], false).await.unwrap_err();
        assert!(matches!(err, BenchError::UnknownSuite(name) if name == "nope"));
    }

    #[tokio::test]
    async fn deploy_commits_checkpoint_and_runs_command() {
        let platform = Arc::new(SimPlatform::new());
        let orch = orchestrator(platform.clone());

        let report = orch.deploy("staging").await.unwrap();
        assert_eq!(report.status, OperationStatus::Ok);
        assert!(platform
            .checkpoint_tags()
            .iter()
            .any(|t| t.starts_with("deploy-staging-")));
    }

    #[tokio::test]
    async fn init_scaffolds_once_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();

        let first = init(dir.path()).await.unwrap();
        assert_eq!(first.status, OperationStatus::Ok);
        let written = tokio::fs::read_to_string(dir.path().join("forkbench.yaml"))
            .await
            .unwrap();
        Manifest::parse(&written).unwrap();

        tokio::fs::write(dir.path().join("forkbench.yaml"), "custom: true")
            .await
            .unwrap();
        let second = init(dir.path()).await.unwrap();
        assert!(second.summary.contains("already exists"));
        let kept = tokio::fs::read_to_string(dir.path().join("forkbench.yaml"))
            .await
            .unwrap();
        assert_eq!(kept, "custom: true");
    }

    #[tokio::test]
    async fn deploy_unknown_target_errors() {
        let orch = orchestrator(Arc::new(SimPlatform::new()));
        let err = orch.deploy("prod").await.unwrap_err();
        assert!(matches!(err, BenchError::UnknownTarget(name) if name == "prod"));
    }
}
