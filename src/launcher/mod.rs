//! Dependency resolution and health-gated service startup.
//!
//! - `DependencyGraph`: directed graph over `depends_on` edges with
//!   deterministic topological ordering and cycle reporting
//! - `ServiceLauncher`: starts services dependencies-first, gated on bounded
//!   health-check polling, with a partial-failure policy that never lets one
//!   failed service abort its independent siblings

mod graph;
mod starter;

pub use graph::DependencyGraph;
pub use starter::{ServiceLauncher, StartOutcome, StartReport};
