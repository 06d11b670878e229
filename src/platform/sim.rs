//! In-memory platform simulator.
//!
//! Backs the test suites with a deterministic stand-in for the real
//! branching platform: checkpoints snapshot environment state, branches
//! clone their parent checkpoint's state, and every primitive call is
//! recorded in an event log so tests can assert ordering (for example that
//! the baseline commit precedes all branch creation).
//!
//! Command execution understands two conventions used by isolation tests:
//! `set KEY=VALUE` mutates the context's key/value state and `get KEY`
//! prints it; every other command resolves through the scripted result
//! table, defaulting to exit code 0.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{BenchError, Result};
use crate::platform::{
    BASELINE_TARGET, BranchInfo, BranchStatus, CheckpointRef, ExecContext, ExecOutput, Platform,
    ServiceState, StressKind,
};

/// One primitive call, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Commit { tag: String },
    Branch { alias: String, from: String },
    Checkout { target: String },
    DeleteBranch { alias: String },
    Rollback { target: String },
    Exec { target: String, command: String },
    ServiceStart { target: String, name: String },
    ServiceStop { target: String, name: String },
    ServicePause { target: String, name: String },
    NetworkIsolate { target: String, name: String },
    Stress { target: String, name: String, intensity: u8 },
    HealthCheck { target: String, name: String, healthy: bool },
}

#[derive(Debug, Clone, Default)]
struct SimEnv {
    services: HashMap<String, ServiceState>,
    kv: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct SimCheckpoint {
    reference: CheckpointRef,
    env: SimEnv,
}

#[derive(Debug, Clone)]
struct SimBranch {
    info: BranchInfo,
    env: SimEnv,
}

#[derive(Default)]
struct SimState {
    baseline: SimEnv,
    checkpoints: Vec<SimCheckpoint>,
    branches: IndexMap<String, SimBranch>,
    events: Vec<SimEvent>,
    scripted: HashMap<String, ExecOutput>,
    health_ramps: HashMap<String, u32>,
    health_polls: HashMap<String, u32>,
}

impl SimState {
    fn env(&self, target: &str) -> Result<&SimEnv> {
        if target == BASELINE_TARGET {
            return Ok(&self.baseline);
        }
        self.branches
            .get(target)
            .map(|b| &b.env)
            .ok_or_else(|| BenchError::UnknownRef(target.to_string()))
    }

    fn env_mut(&mut self, target: &str) -> Result<&mut SimEnv> {
        if target == BASELINE_TARGET {
            return Ok(&mut self.baseline);
        }
        self.branches
            .get_mut(target)
            .map(|b| &mut b.env)
            .ok_or_else(|| BenchError::UnknownRef(target.to_string()))
    }

    fn checkpoint(&self, target: &str) -> Option<&SimCheckpoint> {
        self.checkpoints
            .iter()
            .find(|c| c.reference.tag == target || c.reference.id == target)
    }
}

/// Deterministic in-memory `Platform` implementation for tests.
#[derive(Default)]
pub struct SimPlatform {
    state: Mutex<SimState>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of a command; unscripted commands succeed silently.
    pub fn script_command(&self, command: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.state.lock().scripted.insert(
            command.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
        );
    }

    /// Make a service's health check fail the first `failing_polls` probes.
    /// Use `u32::MAX` for a service that never becomes healthy.
    pub fn script_health_ramp(&self, service: &str, failing_polls: u32) {
        self.state
            .lock()
            .health_ramps
            .insert(service.to_string(), failing_polls);
    }

    /// Full event log in invocation order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Branch aliases in creation order.
    pub fn branch_aliases(&self) -> Vec<String> {
        self.state.lock().branches.keys().cloned().collect()
    }

    /// Checkpoint tags in creation order.
    pub fn checkpoint_tags(&self) -> Vec<String> {
        self.state
            .lock()
            .checkpoints
            .iter()
            .map(|c| c.reference.tag.clone())
            .collect()
    }

    /// Key/value state of a target environment, for isolation assertions.
    pub fn kv(&self, target: &str, key: &str) -> Option<String> {
        let state = self.state.lock();
        state.env(target).ok()?.kv.get(key).cloned()
    }

    /// Service state inside a target environment.
    pub fn service_state(&self, target: &str, name: &str) -> Option<ServiceState> {
        let state = self.state.lock();
        state.env(target).ok()?.services.get(name).copied()
    }

    fn record(&self, event: SimEvent) {
        self.state.lock().events.push(event);
    }
}

#[async_trait]
impl Platform for SimPlatform {
    async fn branch(&self, alias: &str, from: &str) -> Result<BranchInfo> {
        let mut state = self.state.lock();
        if state.branches.contains_key(alias) {
            return Err(BenchError::Platform(format!(
                "branch alias already exists: {alias}"
            )));
        }

        let (env, parent) = if let Some(checkpoint) = state.checkpoint(from) {
            (checkpoint.env.clone(), checkpoint.reference.id.clone())
        } else if let Some(branch) = state.branches.get(from) {
            (branch.env.clone(), branch.info.parent_checkpoint.clone())
        } else if from == BASELINE_TARGET {
            (state.baseline.clone(), BASELINE_TARGET.to_string())
        } else {
            return Err(BenchError::UnknownRef(from.to_string()));
        };

        let info = BranchInfo {
            id: format!("br-{}", Uuid::new_v4()),
            alias: alias.to_string(),
            parent_checkpoint: parent,
            status: BranchStatus::Running,
        };
        state.branches.insert(
            alias.to_string(),
            SimBranch {
                info: info.clone(),
                env,
            },
        );
        state.events.push(SimEvent::Branch {
            alias: alias.to_string(),
            from: from.to_string(),
        });
        Ok(info)
    }

    async fn checkout(&self, target: &str) -> Result<ExecContext> {
        let mut state = self.state.lock();
        let known = target == BASELINE_TARGET
            || state.branches.contains_key(target)
            || state.checkpoint(target).is_some();
        if !known {
            return Err(BenchError::UnknownRef(target.to_string()));
        }
        state.events.push(SimEvent::Checkout {
            target: target.to_string(),
        });
        Ok(ExecContext::new(target))
    }

    async fn commit(&self, tag: &str, _message: Option<&str>) -> Result<CheckpointRef> {
        let mut state = self.state.lock();
        let reference = CheckpointRef {
            id: format!("ckpt-{}", Uuid::new_v4()),
            tag: tag.to_string(),
            created_at: Utc::now(),
        };
        let env = state.baseline.clone();
        state.checkpoints.push(SimCheckpoint {
            reference: reference.clone(),
            env,
        });
        state.events.push(SimEvent::Commit {
            tag: tag.to_string(),
        });
        Ok(reference)
    }

    async fn rollback(&self, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        let env = state
            .checkpoint(target)
            .map(|c| c.env.clone())
            .ok_or_else(|| BenchError::UnknownRef(target.to_string()))?;
        state.baseline = env;
        state.events.push(SimEvent::Rollback {
            target: target.to_string(),
        });
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        command: &str,
        _env: &IndexMap<String, String>,
    ) -> Result<ExecOutput> {
        let mut state = self.state.lock();
        state.events.push(SimEvent::Exec {
            target: ctx.target().to_string(),
            command: command.to_string(),
        });

        if let Some(kv) = command.strip_prefix("set ") {
            if let Some((key, value)) = kv.split_once('=') {
                state
                    .env_mut(ctx.target())?
                    .kv
                    .insert(key.trim().to_string(), value.trim().to_string());
                return Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                });
            }
        }

        if let Some(key) = command.strip_prefix("get ") {
            let value = state.env(ctx.target())?.kv.get(key.trim()).cloned();
            return Ok(match value {
                Some(value) => ExecOutput {
                    stdout: value,
                    stderr: String::new(),
                    exit_code: 0,
                },
                None => ExecOutput {
                    stdout: String::new(),
                    stderr: format!("unset key: {}", key.trim()),
                    exit_code: 1,
                },
            });
        }

        Ok(state.scripted.get(command).cloned().unwrap_or(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        }))
    }

    async fn delete_branch(&self, alias: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .branches
            .shift_remove(alias)
            .ok_or_else(|| BenchError::UnknownRef(alias.to_string()))?;
        state.events.push(SimEvent::DeleteBranch {
            alias: alias.to_string(),
        });
        Ok(())
    }

    async fn service_set_template(
        &self,
        ctx: &ExecContext,
        name: &str,
        template: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state
            .env_mut(ctx.target())?
            .kv
            .insert(format!("template/{name}"), template.to_string());
        Ok(())
    }

    async fn service_start(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .env_mut(ctx.target())?
            .services
            .insert(name.to_string(), ServiceState::Running);
        state.events.push(SimEvent::ServiceStart {
            target: ctx.target().to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn service_stop(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .env_mut(ctx.target())?
            .services
            .insert(name.to_string(), ServiceState::Stopped);
        state.events.push(SimEvent::ServiceStop {
            target: ctx.target().to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn service_pause(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .env_mut(ctx.target())?
            .services
            .insert(name.to_string(), ServiceState::Paused);
        state.events.push(SimEvent::ServicePause {
            target: ctx.target().to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn service_status(&self, ctx: &ExecContext, name: &str) -> Result<ServiceState> {
        let state = self.state.lock();
        Ok(state
            .env(ctx.target())?
            .services
            .get(name)
            .copied()
            .unwrap_or(ServiceState::Stopped))
    }

    async fn service_health(&self, ctx: &ExecContext, name: &str, _command: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let polls = state.health_polls.entry(name.to_string()).or_insert(0);
        *polls += 1;
        let done = *polls;
        let ramp = state.health_ramps.get(name).copied().unwrap_or(0);
        let running = state
            .env(ctx.target())?
            .services
            .get(name)
            .copied()
            .unwrap_or(ServiceState::Stopped)
            == ServiceState::Running;
        let healthy = running && done > ramp;
        state.events.push(SimEvent::HealthCheck {
            target: ctx.target().to_string(),
            name: name.to_string(),
            healthy,
        });
        Ok(healthy)
    }

    async fn network_isolate(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .env_mut(ctx.target())?
            .services
            .insert(name.to_string(), ServiceState::Isolated);
        state.events.push(SimEvent::NetworkIsolate {
            target: ctx.target().to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn stress(
        &self,
        ctx: &ExecContext,
        name: &str,
        _kind: StressKind,
        intensity: u8,
        _duration: Duration,
    ) -> Result<()> {
        self.record(SimEvent::Stress {
            target: ctx.target().to_string(),
            name: name.to_string(),
            intensity,
        });
        Ok(())
    }
}
