use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};
use crate::executor::{Scenario, ScenarioState, TestResult, TestStatus};
use crate::manifest::TestSuite;
use crate::platform::Platform;

/// Execution options for one run.
#[derive(Debug, Clone)]
pub struct ExecutePlan {
    pub parallel: bool,
    pub branch_prefix: String,
    pub max_parallel: usize,
}

impl Default for ExecutePlan {
    fn default() -> Self {
        Self {
            parallel: false,
            branch_prefix: "fb".to_string(),
            max_parallel: 8,
        }
    }
}

/// Drives a set of test suites as isolated branches of one baseline.
pub struct ScenarioRunner {
    platform: Arc<dyn Platform>,
}

impl ScenarioRunner {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Execute every scenario of `suites` against a fresh baseline
    /// checkpoint.
    ///
    /// The baseline commit happens synchronously before any branch is
    /// created, so all scenarios fork from identical state. Scenarios are
    /// peers: each forks from the baseline, never from a sibling. One
    /// `TestResult` comes back per (suite, scenario), in declaration order.
    pub async fn execute(
        &self,
        suites: &[(String, TestSuite)],
        plan: &ExecutePlan,
    ) -> Result<Vec<TestResult>> {
        let scenarios = self.expand_all(suites, &plan.branch_prefix)?;
        if scenarios.is_empty() {
            return Ok(Vec::new());
        }

        let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
        let baseline_tag = format!("{}-baseline-{}", plan.branch_prefix, timestamp);
        let baseline = self.platform.commit(&baseline_tag, None).await?;
        info!(tag = %baseline_tag, id = %baseline.id, scenarios = scenarios.len(), "Baseline committed");

        if plan.parallel {
            self.run_parallel(scenarios, baseline_tag, plan.max_parallel)
                .await
        } else {
            self.run_sequential(scenarios, &baseline_tag).await
        }
    }

    /// Expand suites into scenarios and reject alias collisions before any
    /// branch exists.
    fn expand_all(&self, suites: &[(String, TestSuite)], prefix: &str) -> Result<Vec<Scenario>> {
        let mut scenarios = Vec::new();
        let mut aliases = HashSet::new();
        for (name, suite) in suites {
            for scenario in Scenario::expand(prefix, name, suite) {
                if !aliases.insert(scenario.alias.clone()) {
                    return Err(BenchError::BranchCollision {
                        alias: scenario.alias,
                    });
                }
                scenarios.push(scenario);
            }
        }
        Ok(scenarios)
    }

    async fn run_sequential(
        &self,
        scenarios: Vec<Scenario>,
        baseline_tag: &str,
    ) -> Result<Vec<TestResult>> {
        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            results.push(run_scenario(self.platform.clone(), scenario, baseline_tag.to_string()).await);
        }
        Ok(results)
    }

    async fn run_parallel(
        &self,
        scenarios: Vec<Scenario>,
        baseline_tag: String,
        max_parallel: usize,
    ) -> Result<Vec<TestResult>> {
        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));

        let mut labels = Vec::with_capacity(scenarios.len());
        let handles: Vec<_> = scenarios
            .into_iter()
            .map(|scenario| {
                let platform = self.platform.clone();
                let baseline = baseline_tag.clone();
                let sem = semaphore.clone();
                let label = (scenario.suite.clone(), scenario.name.clone());
                labels.push(label.clone());
                tokio::spawn(async move {
                    match sem.acquire().await {
                        Ok(_permit) => run_scenario(platform, scenario, baseline).await,
                        Err(_) => {
                            error_result(&label.0, &label.1, 0, "semaphore closed".to_string())
                        }
                    }
                })
            })
            .collect();

        // join_all preserves handle order, keeping results deterministic.
        let joined = join_all(handles).await;
        Ok(joined
            .into_iter()
            .zip(labels)
            .map(|(r, (suite, scenario))| match r {
                Ok(result) => result,
                Err(e) => {
                    error_result(&suite, &scenario, 0, format!("scenario panicked: {e}"))
                }
            })
            .collect())
    }
}

/// Run one scenario to completion inside its own branch and execution
/// context. Never propagates errors upward: every failure mode lands in the
/// returned `TestResult`, so siblings are unaffected.
pub(crate) async fn run_scenario(
    platform: Arc<dyn Platform>,
    mut scenario: Scenario,
    baseline_tag: String,
) -> TestResult {
    let started = Instant::now();

    if let Err(e) = platform.branch(&scenario.alias, &baseline_tag).await {
        scenario.advance(ScenarioState::Error);
        return error_result(&scenario.suite, &scenario.name, elapsed_ms(started), e.to_string());
    }
    scenario.advance(ScenarioState::Branched);

    // The context is owned by this task alone; no shared current-branch
    // pointer exists for a sibling to clobber.
    let ctx = match platform.checkout(&scenario.alias).await {
        Ok(ctx) => ctx,
        Err(e) => {
            scenario.advance(ScenarioState::Error);
            return error_result(&scenario.suite, &scenario.name, elapsed_ms(started), e.to_string());
        }
    };
    scenario.advance(ScenarioState::Running);
    debug!(alias = %scenario.alias, "Scenario branch ready");

    // Matrix runs re-pin and restart substituted services inside this
    // branch before the command sees them.
    for substitution in &scenario.substitutions {
        if let Err(e) = apply_substitution(&platform, &ctx, substitution).await {
            scenario.advance(ScenarioState::Error);
            return error_result(&scenario.suite, &scenario.name, elapsed_ms(started), e.to_string());
        }
    }

    if let Some(before) = &scenario.before {
        match platform.execute(&ctx, before, &scenario.env).await {
            Ok(out) if !out.success() => {
                scenario.advance(ScenarioState::Error);
                return error_result(
                    &scenario.suite,
                    &scenario.name,
                    elapsed_ms(started),
                    format!("before hook exited {}: {}", out.exit_code, out.stderr),
                );
            }
            Err(e) => {
                scenario.advance(ScenarioState::Error);
                return error_result(&scenario.suite, &scenario.name, elapsed_ms(started), e.to_string());
            }
            Ok(_) => {}
        }
    }

    let command = match scenario.timeout_secs {
        // Timeout passes through to the invoked command, not enforced here.
        Some(secs) => format!("timeout {secs} {}", scenario.command),
        None => scenario.command.clone(),
    };

    let result = match platform.execute(&ctx, &command, &scenario.env).await {
        Ok(out) => {
            let succeeded = out.success();
            let status = if succeeded {
                scenario.advance(ScenarioState::Passed);
                TestStatus::Passed
            } else {
                scenario.advance(ScenarioState::Failed);
                TestStatus::Failed
            };
            TestResult {
                suite: scenario.suite.clone(),
                scenario: scenario.name.clone(),
                status,
                duration_ms: elapsed_ms(started),
                output: out.stdout,
                error: (!succeeded).then_some(out.stderr),
            }
        }
        Err(e) => {
            scenario.advance(ScenarioState::Error);
            error_result(&scenario.suite, &scenario.name, elapsed_ms(started), e.to_string())
        }
    };

    // After-hook is best-effort; its failure never flips the scenario.
    if let Some(after) = &scenario.after {
        match platform.execute(&ctx, after, &scenario.env).await {
            Ok(out) if !out.success() => {
                warn!(alias = %scenario.alias, exit_code = out.exit_code, "After hook failed")
            }
            Err(e) => warn!(alias = %scenario.alias, error = %e, "After hook failed"),
            Ok(_) => {}
        }
    }

    info!(
        suite = %result.suite,
        scenario = %result.scenario,
        status = ?result.status,
        duration_ms = result.duration_ms,
        "Scenario finished"
    );
    result
}

async fn apply_substitution(
    platform: &Arc<dyn Platform>,
    ctx: &crate::platform::ExecContext,
    substitution: &crate::executor::ServiceSubstitution,
) -> Result<()> {
    let name = substitution.service.as_str();
    platform
        .service_set_template(ctx, name, &substitution.template)
        .await?;
    if platform.service_status(ctx, name).await? != crate::platform::ServiceState::Stopped {
        platform.service_stop(ctx, name).await?;
    }
    platform.service_start(ctx, name).await?;

    let Some(health) = &substitution.healthcheck else {
        return Ok(());
    };
    for attempt in 1..=health.retries {
        if platform.service_health(ctx, name, &health.command).await? {
            return Ok(());
        }
        if attempt < health.retries {
            tokio::time::sleep(std::time::Duration::from_millis(health.interval_ms)).await;
        }
    }
    Err(BenchError::ServiceUnhealthy {
        service: name.to_string(),
        attempts: health.retries,
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn error_result(suite: &str, scenario: &str, duration_ms: u64, message: String) -> TestResult {
    TestResult {
        suite: suite.to_string(),
        scenario: scenario.to_string(),
        status: TestStatus::Error,
        duration_ms,
        output: String::new(),
        error: Some(message),
    }
}
