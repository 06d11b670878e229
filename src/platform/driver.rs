use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    BranchInfo, BranchStatus, CheckpointRef, ExecContext, ExecOutput, Platform, ServiceState,
    StressKind,
};
use crate::error::{BenchError, Result};

/// Default name of the platform control binary.
pub const DEFAULT_DRIVER_CMD: &str = "forkctl";

/// `Platform` implementation that shells out to the platform's control CLI.
///
/// Every trait method maps to one `forkctl` invocation. Identities come back
/// on stdout, one value per line; non-zero exit from the control binary is a
/// platform error, except for `exec` where the exit code belongs to the
/// command under test.
pub struct DriverPlatform {
    program: String,
}

impl DriverPlatform {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Honors `FORKBENCH_DRIVER` for pointing at a non-default binary.
    pub fn from_env() -> Self {
        let program =
            std::env::var("FORKBENCH_DRIVER").unwrap_or_else(|_| DEFAULT_DRIVER_CMD.to_string());
        Self::new(program)
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(program = %self.program, args = ?args, "Running platform command");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| BenchError::Execution(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "Platform command failed");
        }

        Ok(output)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BenchError::Platform(stderr.trim().to_string()));
        }

        Ok(output)
    }

    fn first_line(output: &Output) -> String {
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[async_trait]
impl Platform for DriverPlatform {
    async fn branch(&self, alias: &str, from: &str) -> Result<BranchInfo> {
        let output = self
            .run_checked(&["branch", "create", alias, "--from", from])
            .await?;
        Ok(BranchInfo {
            id: Self::first_line(&output),
            alias: alias.to_string(),
            parent_checkpoint: from.to_string(),
            status: BranchStatus::Running,
        })
    }

    async fn checkout(&self, target: &str) -> Result<ExecContext> {
        self.run_checked(&["checkout", target]).await?;
        Ok(ExecContext::new(target))
    }

    async fn commit(&self, tag: &str, message: Option<&str>) -> Result<CheckpointRef> {
        let mut args = vec!["checkpoint", "commit", tag];
        if let Some(message) = message {
            args.push("-m");
            args.push(message);
        }
        let output = self.run_checked(&args).await?;
        Ok(CheckpointRef {
            id: Self::first_line(&output),
            tag: tag.to_string(),
            created_at: Utc::now(),
        })
    }

    async fn rollback(&self, target: &str) -> Result<()> {
        self.run_checked(&["rollback", target]).await?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        command: &str,
        env: &IndexMap<String, String>,
    ) -> Result<ExecOutput> {
        let mut args: Vec<String> = vec!["exec".to_string(), ctx.target().to_string()];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--".to_string());
        args.push(command.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        // The command under test is allowed to fail; its exit code is data.
        let output = self.run(&arg_refs).await?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn delete_branch(&self, alias: &str) -> Result<()> {
        self.run_checked(&["branch", "delete", alias]).await?;
        Ok(())
    }

    async fn service_set_template(
        &self,
        ctx: &ExecContext,
        name: &str,
        template: &str,
    ) -> Result<()> {
        self.run_checked(&["service", "set-template", ctx.target(), name, template])
            .await?;
        Ok(())
    }

    async fn service_start(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        self.run_checked(&["service", "start", ctx.target(), name])
            .await?;
        Ok(())
    }

    async fn service_stop(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        self.run_checked(&["service", "stop", ctx.target(), name])
            .await?;
        Ok(())
    }

    async fn service_pause(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        self.run_checked(&["service", "pause", ctx.target(), name])
            .await?;
        Ok(())
    }

    async fn service_status(&self, ctx: &ExecContext, name: &str) -> Result<ServiceState> {
        let output = self
            .run_checked(&["service", "status", ctx.target(), name])
            .await?;
        match Self::first_line(&output).as_str() {
            "running" => Ok(ServiceState::Running),
            "paused" => Ok(ServiceState::Paused),
            "stopped" => Ok(ServiceState::Stopped),
            "isolated" => Ok(ServiceState::Isolated),
            other => Err(BenchError::Platform(format!(
                "unrecognized service state '{}' for {}",
                other, name
            ))),
        }
    }

    async fn service_health(&self, ctx: &ExecContext, name: &str, command: &str) -> Result<bool> {
        let output = self
            .run(&["service", "health", ctx.target(), name, "--", command])
            .await?;
        Ok(output.status.success())
    }

    async fn network_isolate(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        self.run_checked(&["network", "isolate", ctx.target(), name])
            .await?;
        Ok(())
    }

    async fn stress(
        &self,
        ctx: &ExecContext,
        name: &str,
        kind: StressKind,
        intensity: u8,
        duration: Duration,
    ) -> Result<()> {
        let kind = match kind {
            StressKind::Cpu => "cpu",
            StressKind::Memory => "memory",
            StressKind::Disk => "disk",
        };
        let intensity = intensity.to_string();
        let secs = duration.as_secs().to_string();
        self.run_checked(&[
            "stress",
            ctx.target(),
            name,
            "--kind",
            kind,
            "--intensity",
            &intensity,
            "--duration",
            &secs,
        ])
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_control_binary_is_an_execution_error() {
        let driver = DriverPlatform::new("forkbench-no-such-binary");
        let err = driver.rollback("baseline").await.unwrap_err();
        assert!(matches!(err, BenchError::Execution(message) if message.contains("forkbench-no-such-binary")));
    }
}
