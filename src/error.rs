use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Manifest validation failed: {}", issues.join("; "))]
    Validation { issues: Vec<String> },

    #[error("Cyclic service dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Service unhealthy after {attempts} health checks: {service}")]
    ServiceUnhealthy { service: String, attempts: u32 },

    #[error("Branch alias collision: {alias}")]
    BranchCollision { alias: String },

    #[error("Chaos recovery failed for {target}: {message}")]
    ChaosRollback { target: String, message: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown test suite: {0}")]
    UnknownSuite(String),

    #[error("Unknown deploy target: {0}")]
    UnknownTarget(String),

    #[error("Unknown branch or checkpoint: {0}")]
    UnknownRef(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    /// Single-issue validation failure.
    pub fn validation(issue: impl Into<String>) -> Self {
        Self::Validation {
            issues: vec![issue.into()],
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
