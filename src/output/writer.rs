use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::orchestrator::OperationReport;

/// Renders a finished operation on stdout.
///
/// Text mode prints the human-readable summary; Json and Stream both emit
/// the full report as one JSON line, so NDJSON consumers can tail either.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn emit_report(&self, report: &OperationReport) {
        match self.format {
            OutputFormat::Text => println!("{}", report.summary),
            OutputFormat::Json | OutputFormat::Stream => self.write_json(report),
        }
    }

    fn write_json<T: Serialize>(&self, value: &T) {
        if let Ok(json) = serde_json::to_string(value) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}
