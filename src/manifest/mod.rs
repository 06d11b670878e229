//! Manifest model: the declarative description of an environment under test.
//!
//! Provides parsing and validation of the manifest document:
//! - `Manifest`: services, test suites, checkpoints, version matrix, deploy targets
//! - `ServiceSpec`, `TestSuite`, `TestBranch`: per-entity specs
//! - `schema`: lazy per-template validation of service config blocks

mod model;
mod schema;

pub use model::{
    DeployTarget, HealthCheck, Manifest, ServiceSpec, TestBranch, TestSuite, VmResources,
};
pub use schema::{TemplateSchema, schema_for, validate_service_config};
