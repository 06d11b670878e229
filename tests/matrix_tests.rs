//! Version-matrix integration tests: expansion, filtering, substitution.

use std::sync::Arc;

use forkbench::executor::{ExecutePlan, TestStatus};
use forkbench::manifest::Manifest;
use forkbench::matrix::MatrixRunner;
use forkbench::platform::SimPlatform;
use indexmap::IndexMap;

const MATRIX_MANIFEST: &str = r#"
name: shop
vm: {cpus: 2, memory_mb: 2048, disk_gb: 20}
services:
  postgres:
    template: postgres@15
  redis:
    template: redis@7
tests:
  compat:
    command: run-compat
matrix:
  postgres: ["14", "15", "16"]
  redis: ["6", "7"]
"#;

fn plan() -> ExecutePlan {
    ExecutePlan {
        parallel: false,
        branch_prefix: "fb".to_string(),
        max_parallel: 4,
    }
}

fn filter(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn full_matrix_visits_every_combination() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = Manifest::parse(MATRIX_MANIFEST).unwrap();
    let runner = MatrixRunner::new(platform.clone(), &manifest);

    let outcome = runner
        .run("compat", &filter(&[]), true, &plan())
        .await
        .unwrap();

    assert_eq!(outcome.combinations, 6);
    assert_eq!(outcome.results.len(), 6);
    assert!(!outcome.short_circuited);

    // Six distinct branches, one per combination.
    let aliases = platform.branch_aliases();
    assert_eq!(aliases.len(), 6);
    assert!(aliases.contains(&"fb-compat-postgres=14-redis=6".to_string()));
    assert!(aliases.contains(&"fb-compat-postgres=16-redis=7".to_string()));
}

#[tokio::test]
async fn filter_pins_a_dimension_before_enumeration() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = Manifest::parse(MATRIX_MANIFEST).unwrap();
    let runner = MatrixRunner::new(platform.clone(), &manifest);

    let outcome = runner
        .run("compat", &filter(&[("redis", "7")]), true, &plan())
        .await
        .unwrap();

    assert_eq!(outcome.combinations, 3);
    let aliases = platform.branch_aliases();
    assert!(aliases.iter().all(|a| a.ends_with("redis=7")));
}

#[tokio::test]
async fn substituted_template_is_pinned_inside_the_combination_branch() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = Manifest::parse(MATRIX_MANIFEST).unwrap();
    let runner = MatrixRunner::new(platform.clone(), &manifest);

    runner
        .run("compat", &filter(&[("postgres", "14"), ("redis", "6")]), true, &plan())
        .await
        .unwrap();

    let alias = "fb-compat-postgres=14-redis=6";
    assert_eq!(
        platform.kv(alias, "template/postgres").as_deref(),
        Some("postgres@14")
    );
    assert_eq!(
        platform.kv(alias, "template/redis").as_deref(),
        Some("redis@6")
    );
    // The baseline keeps its manifest-declared versions.
    assert_eq!(platform.kv("baseline", "template/postgres"), None);
}

#[tokio::test]
async fn first_failure_short_circuits_by_default() {
    let platform = Arc::new(SimPlatform::new());
    platform.script_command("run-compat", 1, "", "incompatible");
    let manifest = Manifest::parse(MATRIX_MANIFEST).unwrap();
    let runner = MatrixRunner::new(platform, &manifest);

    let outcome = runner
        .run("compat", &filter(&[]), false, &plan())
        .await
        .unwrap();

    assert!(outcome.short_circuited);
    assert_eq!(outcome.combinations, 6);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].status, TestStatus::Failed);
}

#[tokio::test]
async fn continue_on_failure_produces_a_full_compatibility_report() {
    let platform = Arc::new(SimPlatform::new());
    platform.script_command("run-compat", 1, "", "incompatible");
    let manifest = Manifest::parse(MATRIX_MANIFEST).unwrap();
    let runner = MatrixRunner::new(platform, &manifest);

    let outcome = runner
        .run("compat", &filter(&[]), true, &plan())
        .await
        .unwrap();

    assert!(!outcome.short_circuited);
    assert_eq!(outcome.results.len(), 6);
    assert!(outcome.results.iter().all(|r| r.status == TestStatus::Failed));
}

#[tokio::test]
async fn unknown_filter_dimension_is_rejected_before_any_branching() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = Manifest::parse(MATRIX_MANIFEST).unwrap();
    let runner = MatrixRunner::new(platform.clone(), &manifest);

    let err = runner
        .run("compat", &filter(&[("mysql", "8")]), true, &plan())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("mysql"));
    assert!(platform.events().is_empty());
}
