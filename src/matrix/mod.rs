//! Version-matrix expansion and execution.
//!
//! A matrix maps dimensions (service names) to allowed versions. The
//! generator walks the cartesian product with an iterative index vector,
//! pruning filtered dimensions before enumeration so a filter never costs a
//! full expansion. Each combination then runs through the same
//! branch-from-baseline path as ordinary scenarios, with the combination's
//! versions substituted into the affected services inside its own fork.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::error::{BenchError, Result};
use crate::executor::{
    ExecutePlan, Scenario, ScenarioState, ServiceSubstitution, TestResult, TestStatus,
    run_scenario,
};
use crate::manifest::Manifest;
use crate::platform::Platform;

/// One assignment of a version to every dimension, in declared dimension
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Combination {
    pub assignments: Vec<(String, String)>,
}

impl Combination {
    /// Deterministic alias fragment: `dim=value` pairs sorted by dimension
    /// name, independent of any map's iteration order, so re-runs compare.
    /// The `=` marks where each dimension name ends, so a dimension
    /// containing `-` cannot collide with another combination's rendering.
    pub fn alias(&self) -> String {
        let mut pairs: Vec<&(String, String)> = self.assignments.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
            .iter()
            .map(|(dim, value)| format!("{dim}={value}"))
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(dim, _)| dim == dimension)
            .map(|(_, value)| value.as_str())
    }
}

/// Enumerate the cartesian product of `matrix`, restricted by `filter`.
///
/// Filtered dimensions are narrowed to their single required value before
/// the walk starts, so filtering is pruning rather than post-hoc discard.
/// The walk itself is an iterative odometer over an index vector; no
/// recursion, so dimension count never threatens the stack.
pub fn combinations(
    matrix: &IndexMap<String, Vec<String>>,
    filter: &IndexMap<String, String>,
) -> Result<Vec<Combination>> {
    for (dimension, value) in filter {
        let Some(allowed) = matrix.get(dimension) else {
            return Err(BenchError::validation(format!(
                "matrix filter names unknown dimension '{dimension}'"
            )));
        };
        if !allowed.contains(value) {
            return Err(BenchError::validation(format!(
                "matrix filter value '{value}' not in dimension '{dimension}'"
            )));
        }
    }

    let dimensions: Vec<(&String, Vec<&String>)> = matrix
        .iter()
        .map(|(dimension, values)| {
            let narrowed: Vec<&String> = match filter.get(dimension) {
                Some(required) => values.iter().filter(|v| *v == required).collect(),
                None => values.iter().collect(),
            };
            (dimension, narrowed)
        })
        .collect();

    if dimensions.is_empty() || dimensions.iter().any(|(_, values)| values.is_empty()) {
        return Ok(Vec::new());
    }

    let mut indices = vec![0usize; dimensions.len()];
    let mut out = Vec::new();
    loop {
        out.push(Combination {
            assignments: dimensions
                .iter()
                .zip(&indices)
                .map(|((dimension, values), &i)| ((*dimension).clone(), values[i].clone()))
                .collect(),
        });

        // Odometer increment, rightmost dimension fastest.
        let mut position = dimensions.len();
        loop {
            if position == 0 {
                return Ok(out);
            }
            position -= 1;
            indices[position] += 1;
            if indices[position] < dimensions[position].1.len() {
                break;
            }
            indices[position] = 0;
        }
    }
}

/// Result of a matrix run.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixOutcome {
    pub results: Vec<TestResult>,
    pub combinations: usize,
    pub short_circuited: bool,
}

/// Runs one suite across every matrix combination.
pub struct MatrixRunner {
    platform: Arc<dyn Platform>,
    manifest: Manifest,
}

impl MatrixRunner {
    pub fn new(platform: Arc<dyn Platform>, manifest: &Manifest) -> Self {
        Self {
            platform,
            manifest: manifest.clone(),
        }
    }

    /// Execute `suite_name` once per combination, each in its own fork of a
    /// single baseline. With `continue_on_failure` unset the run stops at
    /// the first non-pass, keeping the results collected so far; set, it
    /// visits every combination for a full compatibility report.
    pub async fn run(
        &self,
        suite_name: &str,
        filter: &IndexMap<String, String>,
        continue_on_failure: bool,
        plan: &ExecutePlan,
    ) -> Result<MatrixOutcome> {
        let suite = self
            .manifest
            .tests
            .get(suite_name)
            .ok_or_else(|| BenchError::UnknownSuite(suite_name.to_string()))?;

        let combos = combinations(&self.manifest.matrix, filter)?;
        if combos.is_empty() {
            return Ok(MatrixOutcome {
                results: Vec::new(),
                combinations: 0,
                short_circuited: false,
            });
        }

        let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
        let baseline_tag = format!("{}-matrix-baseline-{}", plan.branch_prefix, timestamp);
        let baseline = self.platform.commit(&baseline_tag, None).await?;
        info!(
            tag = %baseline_tag,
            id = %baseline.id,
            combinations = combos.len(),
            "Matrix baseline committed"
        );

        let total = combos.len();
        let mut results = Vec::with_capacity(total);
        let mut short_circuited = false;

        for combo in combos {
            let scenario = self.scenario_for(suite_name, suite, &combo, &plan.branch_prefix)?;
            let result = run_scenario(self.platform.clone(), scenario, baseline_tag.clone()).await;
            let passed = result.status == TestStatus::Passed;
            results.push(result);

            if !passed && !continue_on_failure {
                info!(combination = %combo.alias(), "Matrix run short-circuited on failure");
                short_circuited = true;
                break;
            }
        }

        Ok(MatrixOutcome {
            results,
            combinations: total,
            short_circuited,
        })
    }

    fn scenario_for(
        &self,
        suite_name: &str,
        suite: &crate::manifest::TestSuite,
        combo: &Combination,
        prefix: &str,
    ) -> Result<Scenario> {
        let mut substitutions = Vec::with_capacity(combo.assignments.len());
        let mut env = suite.env.clone();
        for (dimension, version) in &combo.assignments {
            let spec = self
                .manifest
                .services
                .get(dimension)
                .ok_or_else(|| BenchError::UnknownService(dimension.clone()))?;
            substitutions.push(ServiceSubstitution {
                service: dimension.clone(),
                template: spec.template_with_version(version),
                healthcheck: spec.healthcheck.clone(),
            });
            env.insert(
                format!("{}_VERSION", dimension.to_uppercase().replace('-', "_")),
                version.clone(),
            );
        }

        let alias_fragment = combo.alias();
        Ok(Scenario {
            suite: suite_name.to_string(),
            name: alias_fragment.clone(),
            alias: format!("{prefix}-{suite_name}-{alias_fragment}"),
            command: suite.command.clone(),
            env,
            before: None,
            after: None,
            timeout_secs: suite.timeout_secs,
            substitutions,
            state: ScenarioState::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(pairs: &[(&str, &[&str])]) -> IndexMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(dim, values)| {
                (
                    dim.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn cartesian_product_counts() {
        let m = matrix(&[("postgres", &["14", "15", "16"]), ("redis", &["6", "7"])]);
        let combos = combinations(&m, &IndexMap::new()).unwrap();
        assert_eq!(combos.len(), 6);

        let aliases: std::collections::HashSet<String> =
            combos.iter().map(Combination::alias).collect();
        assert_eq!(aliases.len(), 6, "no duplicate combinations");
    }

    #[test]
    fn filter_prunes_to_required_value() {
        let m = matrix(&[("postgres", &["14", "15", "16"]), ("redis", &["6", "7"])]);
        let filter = IndexMap::from([("redis".to_string(), "7".to_string())]);
        let combos = combinations(&m, &filter).unwrap();
        assert_eq!(combos.len(), 3);
        assert!(combos.iter().all(|c| c.get("redis") == Some("7")));
    }

    #[test]
    fn filter_unknown_dimension_fails() {
        let m = matrix(&[("postgres", &["14"])]);
        let filter = IndexMap::from([("mongo".to_string(), "6".to_string())]);
        assert!(matches!(
            combinations(&m, &filter),
            Err(BenchError::Validation { .. })
        ));
    }

    #[test]
    fn filter_unknown_value_fails() {
        let m = matrix(&[("postgres", &["14", "15"])]);
        let filter = IndexMap::from([("postgres".to_string(), "9".to_string())]);
        assert!(matches!(
            combinations(&m, &filter),
            Err(BenchError::Validation { .. })
        ));
    }

    #[test]
    fn alias_is_sorted_by_dimension_name() {
        // Declared order zulu-first: alias still sorts alphabetically.
        let m = matrix(&[("zulu", &["1"]), ("alpha", &["2"])]);
        let combos = combinations(&m, &IndexMap::new()).unwrap();
        assert_eq!(combos[0].alias(), "alpha=2-zulu=1");
        // Enumeration itself keeps declared dimension order.
        assert_eq!(combos[0].assignments[0].0, "zulu");
    }

    #[test]
    fn hyphenated_dimension_names_render_distinct_aliases() {
        // `pg-ha`=1 and `pg`=`ha-1` must not collapse to one alias.
        let left = Combination {
            assignments: vec![("pg-ha".to_string(), "1".to_string())],
        };
        let right = Combination {
            assignments: vec![("pg".to_string(), "ha-1".to_string())],
        };
        assert_eq!(left.alias(), "pg-ha=1");
        assert_eq!(right.alias(), "pg=ha-1");
        assert_ne!(left.alias(), right.alias());
    }

    #[test]
    fn enumeration_order_is_odometer_over_declared_dims() {
        let m = matrix(&[("a", &["1", "2"]), ("b", &["x", "y"])]);
        let combos = combinations(&m, &IndexMap::new()).unwrap();
        let flat: Vec<(&str, &str)> = combos
            .iter()
            .map(|c| (c.get("a").unwrap(), c.get("b").unwrap()))
            .collect();
        assert_eq!(
            flat,
            [("1", "x"), ("1", "y"), ("2", "x"), ("2", "y")]
        );
    }

    #[test]
    fn empty_matrix_yields_no_combinations() {
        let combos = combinations(&IndexMap::new(), &IndexMap::new()).unwrap();
        assert!(combos.is_empty());
    }
}
