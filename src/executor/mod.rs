//! Scenario branch execution: many isolated forks of one baseline.
//!
//! - `Scenario`, `ScenarioState`: per-scenario state machine
//! - `TestResult`, `TestStatus`: the one record each scenario produces
//! - `ScenarioRunner`: commits the baseline checkpoint, forks one branch per
//!   scenario, and drives them in parallel or sequentially

mod runner;
mod scenario;

pub use runner::{ExecutePlan, ScenarioRunner};
pub use scenario::{Scenario, ScenarioState, ServiceSubstitution, TestResult, TestStatus};

pub(crate) use runner::run_scenario;
