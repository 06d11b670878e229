use console::{Style, style};

use crate::orchestrator::{OperationReport, OperationStatus};

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
    }

    /// Status-colored one-line verdict printed above the report body.
    pub fn print_verdict(&self, report: &OperationReport) {
        let label = match report.status {
            OperationStatus::Ok => "ok",
            OperationStatus::Partial => "partial",
            OperationStatus::Failed => "failed",
        };
        println!(
            "{} {}",
            self.status_style(report.status).apply_to(label),
            style(&report.operation).dim()
        );
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("error:").red().bold(), message);
    }

    fn status_style(&self, status: OperationStatus) -> Style {
        match status {
            OperationStatus::Ok => Style::new().green().bold(),
            OperationStatus::Partial => Style::new().yellow().bold(),
            OperationStatus::Failed => Style::new().red().bold(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}
