use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// VM resource envelope for the whole environment or a single service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmResources {
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl Default for VmResources {
    fn default() -> Self {
        Self {
            cpus: 2,
            memory_mb: 2048,
            disk_gb: 20,
        }
    }
}

/// Health check attached to a service: `command` is polled every
/// `interval_ms` up to `retries` times before the service is declared
/// unhealthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub command: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

/// One service in the environment. `template` is a `name@version` pair;
/// the version part is substitutable during matrix runs and immutable
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub template: String,
    #[serde(default)]
    pub config: IndexMap<String, serde_yaml_bw::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub healthcheck: Option<HealthCheck>,
    #[serde(default)]
    pub resources: Option<VmResources>,
}

impl ServiceSpec {
    /// Template name without the version suffix.
    pub fn template_name(&self) -> &str {
        self.template
            .split_once('@')
            .map(|(name, _)| name)
            .unwrap_or(&self.template)
    }

    /// Version suffix of the template, if declared.
    pub fn template_version(&self) -> Option<&str> {
        self.template.split_once('@').map(|(_, version)| version)
    }

    /// Template id with the version replaced (used by matrix runs).
    pub fn template_with_version(&self, version: &str) -> String {
        format!("{}@{}", self.template_name(), version)
    }
}

/// A variant of a test suite executed in its own branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestBranch {
    pub name: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

/// A test suite: one command, optionally fanned out into branch variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub command: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub branches: Vec<TestBranch>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A named deployment target: the service subset to bring up (empty means
/// all services) and an optional post-deploy command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployTarget {
    pub services: Vec<String>,
    pub command: Option<String>,
}

/// Top-level manifest. Maps keep declaration order, which the launcher and
/// matrix generator rely on for deterministic ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub name: String,
    pub vm: Option<VmResources>,
    pub services: IndexMap<String, ServiceSpec>,
    pub tests: IndexMap<String, TestSuite>,
    pub checkpoints: Vec<String>,
    pub matrix: IndexMap<String, Vec<String>>,
    pub deploy: IndexMap<String, DeployTarget>,
}

impl Manifest {
    /// Parse and validate a raw manifest document.
    ///
    /// Validation collects every issue (missing required fields, dangling
    /// `depends_on` references) into a single `Validation` error rather than
    /// stopping at the first one.
    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml_bw::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        if self.name.is_empty() {
            issues.push("missing required field: name".to_string());
        }
        if self.vm.is_none() {
            issues.push("missing required field: vm".to_string());
        }

        for (name, service) in &self.services {
            for dep in &service.depends_on {
                if !self.services.contains_key(dep) {
                    issues.push(format!(
                        "service '{}' depends on unknown service '{}'",
                        name, dep
                    ));
                }
            }
        }

        for (name, suite) in &self.tests {
            for dep in &suite.depends_on {
                if !self.services.contains_key(dep) {
                    issues.push(format!(
                        "test suite '{}' depends on unknown service '{}'",
                        name, dep
                    ));
                }
            }
        }

        for dimension in self.matrix.keys() {
            if !self.services.contains_key(dimension) {
                issues.push(format!(
                    "matrix dimension '{}' does not name a service",
                    dimension
                ));
            }
        }

        for (target, deploy) in &self.deploy {
            for service in &deploy.services {
                if !self.services.contains_key(service) {
                    issues.push(format!(
                        "deploy target '{}' references unknown service '{}'",
                        target, service
                    ));
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(BenchError::Validation { issues })
        }
    }

}
