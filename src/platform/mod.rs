//! Boundary contract with the branching execution platform.
//!
//! The platform owns branch and checkpoint identities and does the actual
//! forking, command execution, and service lifecycle work. The orchestrator
//! only talks to it through the `Platform` trait and keeps alias-to-id
//! back-references.
//!
//! Every call that touches environment state takes an `ExecContext` naming
//! the branch it addresses. There is deliberately no "current branch" on the
//! platform side: each concurrent scenario task owns its own context, so
//! parallel scenarios cannot race each other's checkouts.

mod driver;
mod sim;

pub use driver::{DEFAULT_DRIVER_CMD, DriverPlatform};
pub use sim::{SimEvent, SimPlatform};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Target of command execution: a branch alias, or the baseline environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    target: String,
}

pub const BASELINE_TARGET: &str = "baseline";

impl ExecContext {
    pub fn baseline() -> Self {
        Self {
            target: BASELINE_TARGET.to_string(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// Lifecycle status of a branch as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Running,
    Paused,
    Stopped,
}

/// Platform-assigned identity of a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub id: String,
    pub alias: String,
    pub parent_checkpoint: String,
    pub status: BranchStatus,
}

/// Platform-assigned identity of a checkpoint. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub id: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// Output of a command executed inside a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Service lifecycle state inside one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Running,
    Paused,
    Isolated,
}

/// Resource-exhaustion flavor for the stress primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressKind {
    Cpu,
    Memory,
    Disk,
}

/// The branching execution platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Fork a new branch from a checkpoint tag or an existing branch alias.
    async fn branch(&self, alias: &str, from: &str) -> Result<BranchInfo>;

    /// Resolve a branch alias or checkpoint tag into an execution context.
    async fn checkout(&self, target: &str) -> Result<ExecContext>;

    /// Snapshot the baseline environment under a tag.
    async fn commit(&self, tag: &str, message: Option<&str>) -> Result<CheckpointRef>;

    /// Restore the baseline environment to a checkpoint (by tag or id).
    async fn rollback(&self, target: &str) -> Result<()>;

    /// Run a command inside the context's environment.
    async fn execute(
        &self,
        ctx: &ExecContext,
        command: &str,
        env: &IndexMap<String, String>,
    ) -> Result<ExecOutput>;

    /// Discard a branch and its state.
    async fn delete_branch(&self, alias: &str) -> Result<()>;

    /// Re-pin a service to a different template id (`name@version`) inside
    /// one environment. Matrix runs use this before restarting the service.
    async fn service_set_template(
        &self,
        ctx: &ExecContext,
        name: &str,
        template: &str,
    ) -> Result<()>;

    async fn service_start(&self, ctx: &ExecContext, name: &str) -> Result<()>;
    async fn service_stop(&self, ctx: &ExecContext, name: &str) -> Result<()>;
    async fn service_pause(&self, ctx: &ExecContext, name: &str) -> Result<()>;
    async fn service_status(&self, ctx: &ExecContext, name: &str) -> Result<ServiceState>;

    /// Run one health-check probe; true means healthy.
    async fn service_health(&self, ctx: &ExecContext, name: &str, command: &str) -> Result<bool>;

    /// Block all network traffic to and from a service.
    async fn network_isolate(&self, ctx: &ExecContext, name: &str) -> Result<()>;

    /// Apply resource exhaustion to a service for a bounded window.
    async fn stress(
        &self,
        ctx: &ExecContext,
        name: &str,
        kind: StressKind,
        intensity: u8,
        duration: Duration,
    ) -> Result<()>;
}
