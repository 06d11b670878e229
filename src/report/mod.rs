//! Pure reduction of test results into run summaries.
//!
//! No side effects and no platform calls: both the suite path and the
//! matrix path hand their `TestResult` lists to the same `summarize`.

use std::fmt::Write as _;

use serde::Serialize;

use crate::executor::{TestResult, TestStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

/// Fold an ordered result list into counts. Idempotent: identical input
/// always produces identical summaries.
pub fn summarize(results: &[TestResult]) -> RunSummary {
    results.iter().fold(RunSummary::default(), |mut acc, r| {
        acc.total += 1;
        match r.status {
            TestStatus::Passed => acc.passed += 1,
            TestStatus::Failed => acc.failed += 1,
            TestStatus::Skipped => acc.skipped += 1,
            TestStatus::Error => acc.errors += 1,
        }
        acc.duration_ms += r.duration_ms;
        acc
    })
}

/// Stable human-readable report: one line per result in input order, then
/// the counts.
pub fn render(results: &[TestResult], summary: &RunSummary) -> String {
    let mut out = String::new();
    for result in results {
        let marker = match result.status {
            TestStatus::Passed => "PASS",
            TestStatus::Failed => "FAIL",
            TestStatus::Skipped => "SKIP",
            TestStatus::Error => "ERROR",
        };
        let _ = writeln!(
            out,
            "{marker:<5} {}/{} ({}ms)",
            result.suite, result.scenario, result.duration_ms
        );
        if let Some(error) = &result.error {
            let _ = writeln!(out, "      {error}");
        }
    }
    let _ = writeln!(
        out,
        "{} total, {} passed, {} failed, {} skipped, {} errors",
        summary.total, summary.passed, summary.failed, summary.skipped, summary.errors
    );
    out
}
