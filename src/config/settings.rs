use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{BenchError, Result};

/// Top-level runner configuration. Everything defaults, so a missing
/// `forkbench.toml` is equivalent to an empty one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Prefix for every branch alias and baseline tag this runner creates.
    pub branch_prefix: String,
    /// Upper bound on concurrently executing scenarios in parallel mode.
    pub max_parallel_scenarios: usize,
    /// Commit a checkpoint automatically after a fully healthy `up`.
    pub checkpoint_on_up: bool,
    pub chaos: ChaosConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Intensity used when an action leaves it unset (0-100).
    pub default_intensity: u8,
    /// Bounded window for isolate/stress actions without a duration.
    pub default_duration_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "fb".to_string(),
            max_parallel_scenarios: 8,
            checkpoint_on_up: true,
            chaos: ChaosConfig::default(),
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            default_intensity: 80,
            default_duration_secs: 30,
        }
    }
}

impl RunnerConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("forkbench.toml");
        let config = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| BenchError::Config(e.to_string()))?;
        fs::write(dir.join("forkbench.toml"), content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.branch_prefix.is_empty() {
            errors.push("branch_prefix must not be empty");
        }
        if self.branch_prefix.contains(char::is_whitespace) {
            errors.push("branch_prefix must not contain whitespace");
        }
        if self.max_parallel_scenarios == 0 {
            errors.push("max_parallel_scenarios must be greater than 0");
        }
        if self.chaos.default_intensity > 100 {
            errors.push("chaos.default_intensity must be between 0 and 100");
        }
        if self.chaos.default_duration_secs == 0 {
            errors.push("chaos.default_duration_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BenchError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RunnerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = RunnerConfig {
            max_parallel_scenarios: 0,
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn intensity_over_100_is_rejected() {
        let config = RunnerConfig {
            chaos: ChaosConfig {
                default_intensity: 130,
                ..ChaosConfig::default()
            },
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn load_round_trips_through_save() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            branch_prefix: "ci".to_string(),
            max_parallel_scenarios: 4,
            ..RunnerConfig::default()
        };
        config.save(dir.path()).await.unwrap();

        let loaded = RunnerConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.branch_prefix, "ci");
        assert_eq!(loaded.max_parallel_scenarios, 4);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = RunnerConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.branch_prefix, "fb");
    }
}
