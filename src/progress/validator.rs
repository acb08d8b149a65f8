//! Progress document validation (spec.md §4.I.1): structural checks plus
//! content heuristics layered on top of `progress::header::ProgressDocument`
//! parsing.
//!
//! Grounded in the teacher's multi-field `ValidationReport` idiom from
//! `application/validation.rs`, reused here for a different document shape.

use crate::progress::header::{ProgressDocument, ProgressStatus, REQUIRED_SECTIONS};
use crate::progress::patterns::{self, DetectedPatterns};

/// A progress document's validation outcome: `errors` block acceptance
/// (spec.md §4.I.1's structural and Completed/placeholder checks),
/// `warnings` are advisory (e.g. no test-results mention). Mirrors the
/// field-pathed-message shape of `domain::validation::ValidationReport`,
/// split into two severities since the progress pipeline treats them
/// differently.
#[derive(Debug, Default)]
pub struct ProgressValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ProgressValidationReport {
    fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates a parsed progress document's content against the heuristics in
/// spec.md §4.I.1: a `Completed` status with only placeholder text in
/// `Output` is an error; any status other than `Completed`/`Error` that
/// never mentions test results is a warning, since most real task output
/// mentions whether tests ran.
pub fn validate(document: &ProgressDocument) -> ProgressValidationReport {
    let mut report = ProgressValidationReport::default();

    for section in REQUIRED_SECTIONS {
        match document.section(section) {
            Some(body) if body.trim().is_empty() => {
                report.add_warning(format!("section `{section}` is present but empty"));
            }
            None => report.add_error(format!("missing required section `{section}`")),
            Some(_) => {}
        }
    }

    if document.header.status == ProgressStatus::Completed {
        let output = document.section("Output").unwrap_or_default();
        if output.trim().is_empty() || patterns::contains_placeholder_text(output) {
            report.add_error("status is Completed but Output section is empty or placeholder text".to_string());
        }
    }

    if !matches!(document.header.status, ProgressStatus::Completed | ProgressStatus::Error) {
        let body = document.body_text();
        if !patterns::mentions_test_results(&body) {
            report.add_warning("no test-results mention found anywhere in the document".to_string());
        }
    }

    report
}

/// Full pattern scan over the document's rendered body text, for callers
/// (monitor/completion/escalator) that need the raw counts rather than a
/// pass/fail verdict.
pub fn scan(document: &ProgressDocument) -> DetectedPatterns {
    patterns::detect(&document.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::header::ProgressHeader;

    fn document_with_output(status: ProgressStatus, output: &str) -> ProgressDocument {
        let mut header = ProgressHeader::new("Agent_QA", "1.1");
        header.status = status;
        let mut doc = ProgressDocument::new(header);
        doc.set_section("Summary", "did the work");
        doc.set_section("Details", "details here");
        doc.set_section("Output", output);
        doc.set_section("Issues", "none");
        doc.set_section("Next Steps", "none");
        doc
    }

    #[test]
    fn completed_with_real_output_is_valid() {
        let doc = document_with_output(ProgressStatus::Completed, "Migrated the schema, all tests passing.");
        let report = validate(&doc);
        assert!(report.is_valid());
    }

    #[test]
    fn completed_with_placeholder_output_is_an_error() {
        let doc = document_with_output(ProgressStatus::Completed, "TBD");
        let report = validate(&doc);
        assert!(!report.is_valid());
    }

    #[test]
    fn in_progress_without_test_mention_warns() {
        let doc = document_with_output(ProgressStatus::InProgress, "still working on it");
        let report = validate(&doc);
        assert!(report.is_valid());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn missing_section_is_an_error() {
        let mut header = ProgressHeader::new("Agent_QA", "1.1");
        header.status = ProgressStatus::InProgress;
        let mut doc = ProgressDocument::new(header);
        doc.set_section("Summary", "x");
        let report = validate(&doc);
        assert!(!report.is_valid());
    }
}
