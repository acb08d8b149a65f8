//! Progress-file header and section round-trip (spec.md §4.I).
//!
//! No direct teacher analogue exists — the teacher keeps memory logs as a
//! loose `memory_log_path` field on `Task` rather than parsing their
//! content — so this module is built fresh in the teacher's manner: a typed
//! header struct, `thiserror` parse errors, and an explicit
//! byte-preservation rule for section rewrites (spec.md §9 Open Questions:
//! "retain existing whitespace").

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The five required sections, in the order a freshly initialized progress
/// file is written (spec.md §4.I).
pub const REQUIRED_SECTIONS: [&str; 5] = ["Summary", "Details", "Output", "Issues", "Next Steps"];

/// Conditional sections, written only when the matching header flag is true.
pub const CONDITIONAL_SECTIONS: [(&str, fn(&ProgressHeader) -> bool); 3] = [
    ("Compatibility Concerns", |h| h.compatibility_issues),
    ("Ad-Hoc Agent Delegation", |h| h.ad_hoc_delegation),
    ("Important Findings", |h| h.important_findings),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProgressStatus {
    Completed,
    Partial,
    Blocked,
    Error,
    InProgress,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Partial => "Partial",
            Self::Blocked => "Blocked",
            Self::Error => "Error",
            Self::InProgress => "InProgress",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "blocked" => Some(Self::Blocked),
            "error" => Some(Self::Error),
            "inprogress" | "in_progress" | "in progress" => Some(Self::InProgress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressHeader {
    pub agent: String,
    pub task_ref: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub ad_hoc_delegation: bool,
    #[serde(default)]
    pub compatibility_issues: bool,
    #[serde(default)]
    pub important_findings: bool,
}

impl ProgressHeader {
    pub fn new(agent: impl Into<String>, task_ref: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task_ref: task_ref.into(),
            status: ProgressStatus::InProgress,
            ad_hoc_delegation: false,
            compatibility_issues: false,
            important_findings: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProgressFileError {
    #[error("missing `---` delimited YAML header")]
    MissingHeader,
    #[error("failed to parse header: {0}")]
    HeaderParse(#[from] serde_yaml::Error),
    #[error("missing required section(s): {0:?}")]
    MissingSections(Vec<String>),
}

/// One `## <Name>` section: the heading exactly as written (so we can
/// reproduce unrecognized/custom headings verbatim) and its body text.
#[derive(Debug, Clone, PartialEq)]
struct Section {
    heading: String,
    body: String,
}

/// A parsed progress file: typed header plus an ordered list of sections.
/// Section lookup is case-insensitive per spec.md §4.I ("case-insensitive
/// matching on read"); rewrites replace exactly one section's body,
/// leaving every other section byte-identical.
#[derive(Debug, Clone)]
pub struct ProgressDocument {
    pub header: ProgressHeader,
    sections: Vec<Section>,
}

impl ProgressDocument {
    pub fn new(header: ProgressHeader) -> Self {
        let mut sections: Vec<Section> = REQUIRED_SECTIONS
            .iter()
            .map(|name| Section { heading: (*name).to_string(), body: String::new() })
            .collect();
        for (name, predicate) in CONDITIONAL_SECTIONS {
            if predicate(&header) {
                sections.push(Section { heading: name.to_string(), body: String::new() });
            }
        }
        Self { header, sections }
    }

    pub fn parse(content: &str) -> Result<Self, ProgressFileError> {
        let (header_yaml, body) = split_header(content).ok_or(ProgressFileError::MissingHeader)?;
        let header: ProgressHeader = serde_yaml::from_str(header_yaml)?;
        let sections = split_sections(body);

        let missing: Vec<String> = REQUIRED_SECTIONS
            .iter()
            .filter(|name| !sections.iter().any(|s| s.heading.eq_ignore_ascii_case(name)))
            .map(|s| (*s).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ProgressFileError::MissingSections(missing));
        }

        Ok(Self { header, sections })
    }

    /// Section body lookup, case-insensitive on the heading name.
    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections.iter().find(|s| s.heading.eq_ignore_ascii_case(name)).map(|s| s.body.as_str())
    }

    pub fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.heading.clone()).collect()
    }

    /// Replace a section's body in place, preserving its heading spelling
    /// and every other section byte-for-byte. If the section is absent it
    /// is appended at the end.
    pub fn set_section(&mut self, name: &str, body: impl Into<String>) {
        let body = body.into();
        if let Some(section) = self.sections.iter_mut().find(|s| s.heading.eq_ignore_ascii_case(name)) {
            section.body = body;
        } else {
            self.sections.push(Section { heading: name.to_string(), body });
        }
    }

    /// Append a line to an existing section's body, retaining its existing
    /// whitespace exactly and adding a single newline before the new line
    /// if the body doesn't already end with one (spec.md §9 Open
    /// Questions' explicit whitespace rule).
    pub fn append_to_section(&mut self, name: &str, line: &str) {
        if let Some(section) = self.sections.iter_mut().find(|s| s.heading.eq_ignore_ascii_case(name)) {
            if !section.body.is_empty() && !section.body.ends_with('\n') {
                section.body.push('\n');
            }
            section.body.push_str(line);
            section.body.push('\n');
        } else {
            self.sections.push(Section { heading: name.to_string(), body: format!("{line}\n") });
        }
    }

    /// The full section text concatenated, used by pattern detection over
    /// "the whole file" (spec.md §4.I.1).
    pub fn body_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "## {}", section.heading);
            out.push_str(&section.body);
        }
        out
    }

    /// Re-render the document: a freshly serialized YAML header followed by
    /// each section's original heading and body. Per spec.md §4.I, only the
    /// header is round-tripped; section content is preserved byte-for-byte
    /// except for whatever the caller mutated via `set_section`/
    /// `append_to_section`.
    pub fn render(&self) -> String {
        let header_yaml = serde_yaml::to_string(&self.header).unwrap_or_default();
        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(header_yaml.trim_end());
        out.push_str("\n---\n");
        for section in &self.sections {
            let _ = writeln!(out, "\n## {}", section.heading);
            out.push_str(&section.body);
        }
        out
    }
}

fn split_header(content: &str) -> Option<(&str, &str)> {
    let trimmed = content.trim_start();
    let rest = trimmed.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---")?;
    let header = &rest[..end];
    let body = &rest[end + 4..];
    Some((header, body.trim_start_matches('\n')))
}

fn split_sections(body: &str) -> Vec<Section> {
    let mut starts: Vec<(usize, &str)> = Vec::new();
    for line in heading_line_starts(body) {
        starts.push(line);
    }

    let mut sections = Vec::with_capacity(starts.len());
    for (idx, (start, heading)) in starts.iter().enumerate() {
        let content_start = *start;
        let next_start = starts.get(idx + 1).map(|(s, _)| *s).unwrap_or(body.len());
        let heading_line_end = body[content_start..].find('\n').map(|i| content_start + i + 1).unwrap_or(next_start);
        let section_body = &body[heading_line_end.min(next_start)..next_start];
        sections.push(Section { heading: (*heading).trim().to_string(), body: section_body.to_string() });
    }
    sections
}

/// Finds every `## <Name>` heading line, returning its byte offset and the
/// heading text (without the `## ` prefix).
fn heading_line_starts(body: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if let Some(heading) = trimmed.strip_prefix("## ") {
            out.push((offset, heading));
        } else if trimmed == "##" {
            out.push((offset, ""));
        }
        offset += line.len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"---
agent: Agent_Foundation
task_ref: "1.1"
status: Completed
ad_hoc_delegation: false
compatibility_issues: false
important_findings: false
---

## Summary
Bootstrapped the workspace.

## Details
Created the crate skeleton and wired the migrations.

## Output
All tests pass, 94% coverage.

## Issues
None

## Next Steps
None
"#;

    #[test]
    fn parses_header_and_sections() {
        let doc = ProgressDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.header.status, ProgressStatus::Completed);
        assert_eq!(doc.section("summary").unwrap().trim(), "Bootstrapped the workspace.");
        assert_eq!(doc.section("Next Steps").unwrap().trim(), "None");
    }

    #[test]
    fn missing_required_section_is_an_error() {
        let content = "---\nagent: a\ntask_ref: \"1.1\"\nstatus: Completed\n---\n## Summary\nx\n";
        let err = ProgressDocument::parse(content).unwrap_err();
        assert!(matches!(err, ProgressFileError::MissingSections(_)));
    }

    #[test]
    fn round_trip_preserves_header_and_section_set() {
        let doc = ProgressDocument::parse(SAMPLE).unwrap();
        let rendered = doc.render();
        let reparsed = ProgressDocument::parse(&rendered).unwrap();
        assert_eq!(doc.header, reparsed.header);
        assert_eq!(doc.section_names(), reparsed.section_names());
        for name in doc.section_names() {
            assert_eq!(doc.section(&name), reparsed.section(&name));
        }
    }

    #[test]
    fn set_section_only_touches_targeted_section() {
        let mut doc = ProgressDocument::parse(SAMPLE).unwrap();
        let before_details = doc.section("Details").unwrap().to_string();
        doc.set_section("Issues", "- blocked by task 2.2\n");
        assert_eq!(doc.section("Details").unwrap(), before_details);
        assert_eq!(doc.section("Issues").unwrap(), "- blocked by task 2.2\n");
    }

    #[test]
    fn append_to_section_retains_prior_content() {
        let mut doc = ProgressDocument::parse(SAMPLE).unwrap();
        doc.set_section("Issues", "- blocked by task 2.2 until schema available\n");
        doc.append_to_section("Issues", "Resolved: 2.2 completed");
        let issues = doc.section("Issues").unwrap();
        assert!(issues.contains("blocked by task 2.2"));
        assert!(issues.contains("Resolved: 2.2 completed"));
    }

    #[test]
    fn new_document_includes_conditional_sections_when_flagged() {
        let mut header = ProgressHeader::new("Agent_QA", "1.1");
        header.compatibility_issues = true;
        let doc = ProgressDocument::new(header);
        assert!(doc.section("Compatibility Concerns").is_some());
        assert!(doc.section("Ad-Hoc Agent Delegation").is_none());
    }
}
