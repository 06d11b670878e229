//! Operation layer tying the manifest, platform, and runner config together.
//!
//! Every CLI subcommand maps to one `Orchestrator` method. Each method
//! returns an `OperationReport` so the binary can render text, JSON, or
//! NDJSON without touching orchestration logic.

mod engine;

pub use engine::{OperationReport, OperationStatus, Orchestrator, init};
