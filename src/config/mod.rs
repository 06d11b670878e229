//! Runner configuration, loaded from `forkbench.toml` when present.

mod settings;

pub use settings::{ChaosConfig, RunnerConfig};
