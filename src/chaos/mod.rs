//! Deliberate failure injection with guaranteed reversibility.
//!
//! Every injection commits a `pre-chaos-<service>-<ts>` checkpoint before
//! touching the service, so any chaos action can be rolled back. Recovery
//! comes in two granularities: roll the whole environment back to a
//! checkpoint, or restart just the affected service.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{BenchError, Result};
use crate::manifest::Manifest;
use crate::platform::{ExecContext, Platform, ServiceState, StressKind};

/// Failure condition to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChaosKind {
    Kill,
    Pause,
    NetworkIsolate,
    CpuStress,
    MemoryStress,
    DiskFill,
}

impl ChaosKind {
    fn stress_kind(self) -> Option<StressKind> {
        match self {
            Self::CpuStress => Some(StressKind::Cpu),
            Self::MemoryStress => Some(StressKind::Memory),
            Self::DiskFill => Some(StressKind::Disk),
            _ => None,
        }
    }
}

impl fmt::Display for ChaosKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Kill => "kill",
            Self::Pause => "pause",
            Self::NetworkIsolate => "network-isolate",
            Self::CpuStress => "cpu-stress",
            Self::MemoryStress => "memory-stress",
            Self::DiskFill => "disk-fill",
        };
        f.write_str(name)
    }
}

/// A requested injection. Unset intensity and duration fall back to the
/// injector's configured defaults.
#[derive(Debug, Clone)]
pub struct ChaosAction {
    pub service: String,
    pub kind: ChaosKind,
    pub duration: Option<Duration>,
    pub intensity: Option<u8>,
}

/// What an injection actually did, including the checkpoint to recover to.
#[derive(Debug, Clone, Serialize)]
pub struct ChaosReport {
    pub service: String,
    pub kind: ChaosKind,
    pub intensity: u8,
    pub duration_secs: u64,
    pub checkpoint_tag: String,
    pub checkpoint_id: String,
}

/// Recovery granularity, chosen by the caller.
#[derive(Debug, Clone)]
pub enum RecoveryTarget {
    /// Roll the entire environment back to a checkpoint tag or id.
    Checkpoint(String),
    /// Restart just the named service, leaving siblings untouched.
    Service(String),
}

/// Bounds applied when an action leaves intensity or duration unset.
#[derive(Debug, Clone, Copy)]
pub struct ChaosDefaults {
    pub intensity: u8,
    pub duration: Duration,
}

impl Default for ChaosDefaults {
    fn default() -> Self {
        Self {
            intensity: 80,
            duration: Duration::from_secs(30),
        }
    }
}

pub struct ChaosInjector {
    platform: Arc<dyn Platform>,
    manifest: Manifest,
    defaults: ChaosDefaults,
    ctx: ExecContext,
}

impl ChaosInjector {
    pub fn new(platform: Arc<dyn Platform>, manifest: &Manifest) -> Self {
        Self {
            platform,
            manifest: manifest.clone(),
            defaults: ChaosDefaults::default(),
            ctx: ExecContext::baseline(),
        }
    }

    pub fn with_defaults(mut self, defaults: ChaosDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Inject a failure. The pre-chaos checkpoint is unconditional and
    /// committed before the action is applied.
    pub async fn inject(&self, action: &ChaosAction) -> Result<ChaosReport> {
        if !self.manifest.services.contains_key(&action.service) {
            return Err(BenchError::UnknownService(action.service.clone()));
        }
        let intensity = action.intensity.unwrap_or(self.defaults.intensity);
        if intensity > 100 {
            return Err(BenchError::validation(format!(
                "chaos intensity {intensity} out of range 0-100"
            )));
        }
        // Unset duration means a short bounded window, never "until recover".
        let duration = action.duration.unwrap_or(self.defaults.duration);

        let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
        let tag = format!("pre-chaos-{}-{}", action.service, timestamp);
        let checkpoint = self
            .platform
            .commit(&tag, Some(&format!("before {} on {}", action.kind, action.service)))
            .await?;
        info!(tag = %tag, service = %action.service, kind = %action.kind, "Pre-chaos checkpoint committed");

        self.apply(action, intensity, duration).await?;
        info!(service = %action.service, kind = %action.kind, intensity, "Chaos injected");

        Ok(ChaosReport {
            service: action.service.clone(),
            kind: action.kind,
            intensity,
            duration_secs: duration.as_secs(),
            checkpoint_tag: checkpoint.tag.clone(),
            checkpoint_id: checkpoint.id.clone(),
        })
    }

    async fn apply(&self, action: &ChaosAction, intensity: u8, duration: Duration) -> Result<()> {
        match action.kind {
            ChaosKind::Kill => self.platform.service_stop(&self.ctx, &action.service).await,
            ChaosKind::Pause => self.platform.service_pause(&self.ctx, &action.service).await,
            ChaosKind::NetworkIsolate => {
                self.platform
                    .network_isolate(&self.ctx, &action.service)
                    .await
            }
            ChaosKind::CpuStress | ChaosKind::MemoryStress | ChaosKind::DiskFill => {
                let kind = action
                    .kind
                    .stress_kind()
                    .unwrap_or(StressKind::Cpu);
                self.platform
                    .stress(&self.ctx, &action.service, kind, intensity, duration)
                    .await
            }
        }
    }

    /// Undo chaos at the chosen granularity.
    pub async fn recover(&self, target: &RecoveryTarget) -> Result<()> {
        match target {
            RecoveryTarget::Checkpoint(checkpoint) => {
                self.platform.rollback(checkpoint).await.map_err(|e| {
                    BenchError::ChaosRollback {
                        target: checkpoint.clone(),
                        message: e.to_string(),
                    }
                })?;
                info!(checkpoint = %checkpoint, "Environment rolled back");
                Ok(())
            }
            RecoveryTarget::Service(service) => {
                let spec = self
                    .manifest
                    .services
                    .get(service)
                    .ok_or_else(|| BenchError::UnknownService(service.clone()))?;

                let restart = async {
                    if self.platform.service_status(&self.ctx, service).await?
                        != ServiceState::Stopped
                    {
                        self.platform.service_stop(&self.ctx, service).await?;
                    }
                    self.platform.service_start(&self.ctx, service).await?;

                    if let Some(health) = &spec.healthcheck {
                        for attempt in 1..=health.retries {
                            if self
                                .platform
                                .service_health(&self.ctx, service, &health.command)
                                .await?
                            {
                                return Ok(());
                            }
                            if attempt < health.retries {
                                tokio::time::sleep(Duration::from_millis(health.interval_ms))
                                    .await;
                            }
                        }
                        return Err(BenchError::ServiceUnhealthy {
                            service: service.clone(),
                            attempts: health.retries,
                        });
                    }
                    Ok(())
                };

                restart.await.map_err(|e: BenchError| {
                    warn!(service = %service, error = %e, "Service recovery failed");
                    BenchError::ChaosRollback {
                        target: service.clone(),
                        message: e.to_string(),
                    }
                })?;
                info!(service = %service, "Service restarted");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{SimEvent, SimPlatform};

    fn manifest() -> Manifest {
        Manifest::parse(
            r#"
name: shop
vm: {}
services:
  postgres:
    template: postgres@15
"#,
        )
        .unwrap()
    }

    fn action(kind: ChaosKind) -> ChaosAction {
        ChaosAction {
            service: "postgres".to_string(),
            kind,
            duration: None,
            intensity: None,
        }
    }

    #[tokio::test]
    async fn checkpoint_precedes_the_kill() {
        let sim = Arc::new(SimPlatform::new());
        let ctx = ExecContext::baseline();
        sim.service_start(&ctx, "postgres").await.unwrap();

        let injector = ChaosInjector::new(sim.clone(), &manifest());
        let report = injector.inject(&action(ChaosKind::Kill)).await.unwrap();

        assert!(report.checkpoint_tag.starts_with("pre-chaos-postgres-"));
        let events = sim.events();
        let commit = events
            .iter()
            .position(|e| matches!(e, SimEvent::Commit { tag } if tag.starts_with("pre-chaos-")))
            .unwrap();
        let stop = events
            .iter()
            .position(|e| matches!(e, SimEvent::ServiceStop { name, .. } if name == "postgres"))
            .unwrap();
        assert!(commit < stop);
    }

    #[tokio::test]
    async fn recover_from_checkpoint_restores_running() {
        let sim = Arc::new(SimPlatform::new());
        let ctx = ExecContext::baseline();
        sim.service_start(&ctx, "postgres").await.unwrap();

        let injector = ChaosInjector::new(sim.clone(), &manifest());
        let report = injector.inject(&action(ChaosKind::Kill)).await.unwrap();
        assert_eq!(
            sim.service_state("baseline", "postgres"),
            Some(ServiceState::Stopped)
        );

        injector
            .recover(&RecoveryTarget::Checkpoint(report.checkpoint_tag.clone()))
            .await
            .unwrap();
        assert_eq!(
            sim.service_state("baseline", "postgres"),
            Some(ServiceState::Running)
        );
    }

    #[tokio::test]
    async fn service_recovery_restarts_only_the_target() {
        let sim = Arc::new(SimPlatform::new());
        let ctx = ExecContext::baseline();
        sim.service_start(&ctx, "postgres").await.unwrap();

        let injector = ChaosInjector::new(sim.clone(), &manifest());
        injector.inject(&action(ChaosKind::Pause)).await.unwrap();

        injector
            .recover(&RecoveryTarget::Service("postgres".to_string()))
            .await
            .unwrap();
        assert_eq!(
            sim.service_state("baseline", "postgres"),
            Some(ServiceState::Running)
        );
    }

    #[tokio::test]
    async fn stress_uses_default_intensity() {
        let sim = Arc::new(SimPlatform::new());
        let ctx = ExecContext::baseline();
        sim.service_start(&ctx, "postgres").await.unwrap();

        let injector = ChaosInjector::new(sim.clone(), &manifest());
        let report = injector
            .inject(&action(ChaosKind::CpuStress))
            .await
            .unwrap();
        assert_eq!(report.intensity, 80);
        assert!(sim.events().iter().any(|e| matches!(
            e,
            SimEvent::Stress { intensity: 80, .. }
        )));
    }

    #[tokio::test]
    async fn unknown_service_is_rejected_before_any_checkpoint() {
        let sim = Arc::new(SimPlatform::new());
        let injector = ChaosInjector::new(sim.clone(), &manifest());
        let err = injector
            .inject(&ChaosAction {
                service: "mongo".to_string(),
                kind: ChaosKind::Kill,
                duration: None,
                intensity: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::UnknownService(_)));
        assert!(sim.checkpoint_tags().is_empty());
    }

    #[tokio::test]
    async fn rollback_to_unknown_checkpoint_is_a_chaos_rollback_error() {
        let sim = Arc::new(SimPlatform::new());
        let injector = ChaosInjector::new(sim.clone(), &manifest());
        let err = injector
            .recover(&RecoveryTarget::Checkpoint("no-such-tag".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::ChaosRollback { .. }));
    }
}
