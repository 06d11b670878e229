//! forkbench: declarative integration testing on a branching execution
//! platform.
//!
//! A manifest describes services, test suites, chaos actions, and a version
//! matrix; the orchestrator drives the platform's copy-on-write forks so
//! every scenario runs against an identical baseline without rebuilding the
//! environment.

pub mod chaos;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod manifest;
pub mod matrix;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod report;

pub use chaos::{ChaosAction, ChaosInjector, ChaosKind, RecoveryTarget};
pub use config::RunnerConfig;
pub use error::{BenchError, Result};
pub use executor::{ExecutePlan, ScenarioRunner, TestResult, TestStatus};
pub use launcher::{DependencyGraph, ServiceLauncher};
pub use manifest::Manifest;
pub use matrix::{Combination, MatrixRunner, combinations};
pub use orchestrator::{OperationReport, OperationStatus, Orchestrator};
pub use platform::{DriverPlatform, Platform, SimPlatform};
pub use report::{RunSummary, summarize};
