use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::launcher::DependencyGraph;
use crate::manifest::{Manifest, validate_service_config};
use crate::platform::{CheckpointRef, ExecContext, Platform, ServiceState};

/// Per-service result of a launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Started and passed its health check (or has none).
    Started,
    /// Was already running; no attempt made.
    AlreadyRunning,
    /// Started but never became healthy within `retries` probes.
    Unhealthy { attempts: u32 },
    /// Not attempted because a dependency failed.
    Blocked { on: String },
    /// Config block failed its template schema check.
    InvalidConfig { message: String },
}

impl StartOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Started | Self::AlreadyRunning)
    }
}

/// Outcome of a `start` call: one entry per attempted service in start
/// order, plus the checkpoint committed if everything came up healthy.
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub outcomes: IndexMap<String, StartOutcome>,
    pub checkpoint: Option<CheckpointRef>,
}

impl StartReport {
    pub fn all_healthy(&self) -> bool {
        self.outcomes.values().all(|o| !o.is_failure())
    }

    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Starts manifest services dependencies-first, gated on health checks.
pub struct ServiceLauncher {
    platform: Arc<dyn Platform>,
    graph: DependencyGraph,
    manifest: Manifest,
    ctx: ExecContext,
}

impl ServiceLauncher {
    pub fn new(platform: Arc<dyn Platform>, manifest: &Manifest) -> Self {
        Self {
            platform,
            graph: DependencyGraph::build(manifest),
            manifest: manifest.clone(),
            ctx: ExecContext::baseline(),
        }
    }

    /// Launch inside a specific branch instead of the baseline environment.
    /// Matrix runs use this to restart substituted services in their own fork.
    pub fn in_context(mut self, ctx: ExecContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Start the requested services (empty slice means every service) plus
    /// their transitive dependencies, in dependency order.
    ///
    /// Partial-failure policy: a failed service never aborts the run.
    /// Independent services are still attempted; services depending on the
    /// failure are marked `Blocked` without an attempt. When a
    /// `checkpoint_tag` is given it is committed only if every requested
    /// service came up healthy.
    pub async fn start(
        &self,
        names: &[String],
        checkpoint_tag: Option<&str>,
    ) -> Result<StartReport> {
        let order = if names.is_empty() {
            self.graph.topo_order()?
        } else {
            self.graph.closure_order(names)?
        };

        let mut outcomes: IndexMap<String, StartOutcome> = IndexMap::new();
        for name in &order {
            let outcome = self.start_one(name, &outcomes).await?;
            match &outcome {
                StartOutcome::Started => info!(service = %name, "Service healthy"),
                StartOutcome::AlreadyRunning => debug!(service = %name, "Service already running"),
                StartOutcome::Unhealthy { attempts } => {
                    warn!(service = %name, attempts, "Service failed health check")
                }
                StartOutcome::Blocked { on } => {
                    warn!(service = %name, blocked_on = %on, "Service blocked by failed dependency")
                }
                StartOutcome::InvalidConfig { message } => {
                    warn!(service = %name, error = %message, "Service config rejected")
                }
            }
            outcomes.insert(name.clone(), outcome);
        }

        let checkpoint = match checkpoint_tag {
            Some(tag) if outcomes.values().all(|o| !o.is_failure()) => {
                let reference = self.platform.commit(tag, Some("services healthy")).await?;
                info!(tag = %tag, id = %reference.id, "Committed post-launch checkpoint");
                Some(reference)
            }
            _ => None,
        };

        Ok(StartReport {
            outcomes,
            checkpoint,
        })
    }

    /// Stop services in reverse dependency order (dependents first).
    pub async fn stop(&self, names: &[String]) -> Result<Vec<String>> {
        let mut order = if names.is_empty() {
            self.graph.topo_order()?
        } else {
            self.graph.closure_order(names)?
        };
        order.reverse();

        let mut stopped = Vec::new();
        for name in order {
            let state = self.platform.service_status(&self.ctx, &name).await?;
            if state != ServiceState::Stopped {
                self.platform.service_stop(&self.ctx, &name).await?;
                info!(service = %name, "Service stopped");
                stopped.push(name);
            }
        }
        Ok(stopped)
    }

    async fn start_one(
        &self,
        name: &str,
        outcomes: &IndexMap<String, StartOutcome>,
    ) -> Result<StartOutcome> {
        // Dependencies appear earlier in topological order, so their
        // outcomes are already recorded.
        if let Some(failed_dep) = self
            .graph
            .dependencies(name)
            .iter()
            .find(|dep| outcomes.get(*dep).is_some_and(StartOutcome::is_failure))
        {
            return Ok(StartOutcome::Blocked {
                on: failed_dep.clone(),
            });
        }

        if self.platform.service_status(&self.ctx, name).await? == ServiceState::Running {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let Some(spec) = self.manifest.services.get(name) else {
            // closure_order already rejected unknown names
            return Ok(StartOutcome::Blocked {
                on: name.to_string(),
            });
        };

        if let Err(e) = validate_service_config(name, spec) {
            return Ok(StartOutcome::InvalidConfig {
                message: e.to_string(),
            });
        }

        self.platform.service_start(&self.ctx, name).await?;

        let Some(health) = &spec.healthcheck else {
            return Ok(StartOutcome::Started);
        };

        // Bounded poll: at most `retries` probes, `interval_ms` apart.
        for attempt in 1..=health.retries {
            if self
                .platform
                .service_health(&self.ctx, name, &health.command)
                .await?
            {
                debug!(service = %name, attempt, "Health check passed");
                return Ok(StartOutcome::Started);
            }
            if attempt < health.retries {
                tokio::time::sleep(Duration::from_millis(health.interval_ms)).await;
            }
        }

        Ok(StartOutcome::Unhealthy {
            attempts: health.retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimPlatform;

    fn manifest(raw: &str) -> Manifest {
        Manifest::parse(raw).unwrap()
    }

    const CHAIN: &str = r#"
name: shop
vm: {}
services:
  postgres:
    template: postgres@15
    healthcheck:
      command: pg_isready
      interval_ms: 1
      retries: 3
  api:
    template: api@1.0
    depends_on: [postgres]
  metrics:
    template: metrics@1.0
"#;

    #[tokio::test]
    async fn blocked_dependents_are_not_attempted() {
        let sim = Arc::new(SimPlatform::new());
        sim.script_health_ramp("postgres", u32::MAX);
        let m = manifest(CHAIN);
        let launcher = ServiceLauncher::new(sim.clone(), &m);

        let report = launcher.start(&[], None).await.unwrap();

        assert_eq!(
            report.outcomes["postgres"],
            StartOutcome::Unhealthy { attempts: 3 }
        );
        assert_eq!(
            report.outcomes["api"],
            StartOutcome::Blocked {
                on: "postgres".to_string()
            }
        );
        // Independent of the failure, still attempted.
        assert_eq!(report.outcomes["metrics"], StartOutcome::Started);
        assert!(sim
            .events()
            .iter()
            .all(|e| !matches!(e, crate::platform::SimEvent::ServiceStart { name, .. } if name == "api")));
    }

    #[tokio::test]
    async fn checkpoint_committed_only_when_all_healthy() {
        let sim = Arc::new(SimPlatform::new());
        let m = manifest(CHAIN);
        let launcher = ServiceLauncher::new(sim.clone(), &m);

        let report = launcher.start(&[], Some("env-ready")).await.unwrap();
        assert!(report.all_healthy());
        assert!(report.checkpoint.is_some());
        assert_eq!(sim.checkpoint_tags(), ["env-ready"]);
    }

    #[tokio::test]
    async fn no_checkpoint_on_partial_failure() {
        let sim = Arc::new(SimPlatform::new());
        sim.script_health_ramp("postgres", u32::MAX);
        let m = manifest(CHAIN);
        let launcher = ServiceLauncher::new(sim.clone(), &m);

        let report = launcher.start(&[], Some("env-ready")).await.unwrap();
        assert!(!report.all_healthy());
        assert!(report.checkpoint.is_none());
        assert!(sim.checkpoint_tags().is_empty());
    }

    #[tokio::test]
    async fn stop_runs_in_reverse_order() {
        let sim = Arc::new(SimPlatform::new());
        let m = manifest(CHAIN);
        let launcher = ServiceLauncher::new(sim.clone(), &m);
        launcher.start(&[], None).await.unwrap();

        let stopped = launcher.stop(&[]).await.unwrap();
        let pos = |name: &str| stopped.iter().position(|n| n == name).unwrap();
        assert!(pos("api") < pos("postgres"));
    }

    #[tokio::test]
    async fn health_ramp_within_retries_succeeds() {
        let sim = Arc::new(SimPlatform::new());
        sim.script_health_ramp("postgres", 2);
        let m = manifest(CHAIN);
        let launcher = ServiceLauncher::new(sim.clone(), &m);

        let report = launcher.start(&["postgres".to_string()], None).await.unwrap();
        assert_eq!(report.outcomes["postgres"], StartOutcome::Started);
    }
}
