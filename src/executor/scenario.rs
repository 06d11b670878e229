use indexmap::IndexMap;
use serde::Serialize;

use crate::manifest::{HealthCheck, TestSuite};

/// Version substitution applied inside a scenario's branch before its
/// command runs: re-pin the service template, restart the service, and
/// wait out its health check.
#[derive(Debug, Clone)]
pub struct ServiceSubstitution {
    pub service: String,
    pub template: String,
    pub healthcheck: Option<HealthCheck>,
}

/// Lifecycle of one scenario. Terminal states mirror `TestStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioState {
    Pending,
    Branched,
    Running,
    Passed,
    Failed,
    Error,
}

impl ScenarioState {
    /// Forward-only transitions: Pending -> Branched -> Running -> terminal.
    pub fn can_transition(self, to: ScenarioState) -> bool {
        use ScenarioState::*;
        matches!(
            (self, to),
            (Pending, Branched)
                | (Branched, Running)
                | (Running, Passed)
                | (Running, Failed)
                // branching or checkout failures error out early
                | (Pending, Error)
                | (Branched, Error)
                | (Running, Error)
        )
    }
}

/// Outcome of a scenario, produced exactly once per (suite, scenario).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub suite: String,
    pub scenario: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub output: String,
    pub error: Option<String>,
}

/// One (suite, branch-variant) pairing with its fully merged environment.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub suite: String,
    pub name: String,
    pub alias: String,
    pub command: String,
    pub env: IndexMap<String, String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub timeout_secs: Option<u64>,
    pub substitutions: Vec<ServiceSubstitution>,
    pub state: ScenarioState,
}

impl Scenario {
    /// Expand a suite into its scenarios. A suite without branch variants
    /// becomes one implicit scenario named after the suite. Branch env
    /// overrides win over suite defaults on key collision.
    pub fn expand(prefix: &str, suite_name: &str, suite: &TestSuite) -> Vec<Scenario> {
        if suite.branches.is_empty() {
            return vec![Scenario {
                suite: suite_name.to_string(),
                name: suite_name.to_string(),
                alias: format!("{prefix}-{suite_name}-{suite_name}"),
                command: suite.command.clone(),
                env: suite.env.clone(),
                before: None,
                after: None,
                timeout_secs: suite.timeout_secs,
                substitutions: Vec::new(),
                state: ScenarioState::Pending,
            }];
        }

        suite
            .branches
            .iter()
            .map(|branch| {
                let mut env = suite.env.clone();
                for (key, value) in &branch.env {
                    env.insert(key.clone(), value.clone());
                }
                Scenario {
                    suite: suite_name.to_string(),
                    name: branch.name.clone(),
                    alias: format!("{prefix}-{suite_name}-{}", branch.name),
                    command: suite.command.clone(),
                    env,
                    before: branch.before.clone(),
                    after: branch.after.clone(),
                    timeout_secs: suite.timeout_secs,
                    substitutions: Vec::new(),
                    state: ScenarioState::Pending,
                }
            })
            .collect()
    }

    /// Advance the state machine; invalid transitions are ignored so a
    /// terminal state sticks.
    pub fn advance(&mut self, to: ScenarioState) {
        if self.state.can_transition(to) {
            self.state = to;
        }
    }
}
