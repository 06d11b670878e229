//! Structured result output.
//!
//! - `OutputWriter`: renders operation reports as text, JSON, or NDJSON

mod writer;

pub use writer::OutputWriter;
