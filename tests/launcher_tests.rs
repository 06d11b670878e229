//! Service launcher integration tests against the in-memory platform.

use std::sync::Arc;

use forkbench::error::BenchError;
use forkbench::launcher::{DependencyGraph, ServiceLauncher};
use forkbench::manifest::Manifest;
use forkbench::platform::{SimEvent, SimPlatform};

fn diamond_manifest() -> Manifest {
    Manifest::parse(
        r#"
name: shop
vm: {cpus: 4, memory_mb: 4096, disk_gb: 40}
services:
  postgres:
    template: postgres@15
    healthcheck: {command: pg_isready, interval_ms: 10, retries: 3}
  redis:
    template: redis@7
  api:
    template: nginx@1.25
    depends_on: [postgres, redis]
  worker:
    template: worker@2
    depends_on: [api]
tests: {}
"#,
    )
    .unwrap()
}

fn start_positions(events: &[SimEvent]) -> Vec<(String, usize)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            SimEvent::ServiceStart { name, .. } => Some((name.clone(), i)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn every_dependency_starts_before_its_dependents() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = diamond_manifest();
    let launcher = ServiceLauncher::new(platform.clone(), &manifest);

    let report = launcher.start(&[], None).await.unwrap();
    assert!(report.all_healthy());

    let positions = start_positions(&platform.events());
    let index = |name: &str| {
        positions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, i)| *i)
            .unwrap()
    };

    assert!(index("postgres") < index("api"));
    assert!(index("redis") < index("api"));
    assert!(index("api") < index("worker"));
}

#[tokio::test]
async fn cycle_is_rejected_naming_both_services() {
    let manifest = Manifest::parse(
        r#"
name: cyclic
vm: {cpus: 1, memory_mb: 512, disk_gb: 5}
services:
  a:
    template: svc@1
    depends_on: [b]
  b:
    template: svc@1
    depends_on: [a]
tests: {}
"#,
    )
    .unwrap();

    let err = DependencyGraph::build(&manifest).topo_order().unwrap_err();
    match err {
        BenchError::CyclicDependency { cycle } => {
            assert!(cycle.contains(&"a".to_string()));
            assert!(cycle.contains(&"b".to_string()));
        }
        other => panic!("expected cycle error, got {other}"),
    }
}

#[tokio::test]
async fn unhealthy_service_blocks_dependents_but_not_siblings() {
    let platform = Arc::new(SimPlatform::new());
    platform.script_health_ramp("postgres", u32::MAX);
    let manifest = diamond_manifest();
    let launcher = ServiceLauncher::new(platform.clone(), &manifest);

    let report = launcher.start(&[], None).await.unwrap();
    assert!(!report.all_healthy());

    let failed = report.failed();
    // postgres failed its health check; api and worker are downstream.
    assert!(failed.contains(&"postgres"));
    assert!(failed.contains(&"api"));
    assert!(failed.contains(&"worker"));
    assert!(!failed.contains(&"redis"));

    // Blocked services were never attempted.
    let started: Vec<_> = start_positions(&platform.events())
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert!(!started.contains(&"api".to_string()));
    assert!(!started.contains(&"worker".to_string()));
}

#[tokio::test]
async fn requesting_one_service_pulls_its_transitive_dependencies() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = diamond_manifest();
    let launcher = ServiceLauncher::new(platform.clone(), &manifest);

    let report = launcher.start(&["api".to_string()], None).await.unwrap();

    let names: Vec<_> = report.outcomes.keys().cloned().collect();
    assert_eq!(names, vec!["postgres", "redis", "api"]);
}

#[tokio::test]
async fn stop_runs_in_reverse_dependency_order() {
    let platform = Arc::new(SimPlatform::new());
    let manifest = diamond_manifest();
    let launcher = ServiceLauncher::new(platform.clone(), &manifest);

    launcher.start(&[], None).await.unwrap();
    let stopped = launcher.stop(&[]).await.unwrap();

    let api_pos = stopped.iter().position(|n| n == "api").unwrap();
    let worker_pos = stopped.iter().position(|n| n == "worker").unwrap();
    let postgres_pos = stopped.iter().position(|n| n == "postgres").unwrap();
    assert!(worker_pos < api_pos);
    assert!(api_pos < postgres_pos);
}
