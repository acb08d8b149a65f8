//! Shared regex families used by the progress pipeline's pattern-detection
//! passes (spec.md §4.I.1-3): completion markers, error indicators, blocker
//! indicators, placeholder text, and context-window handover language.
//!
//! Grounded in the teacher's regex-per-concern style seen in
//! `services/` text-scanning code: a `OnceLock`-cached `Regex` behind a
//! small accessor function per pattern, rather than one giant alternation.

use std::sync::OnceLock;

use regex::Regex;
use regex::RegexSet;

macro_rules! cached_regex {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect("static pattern is valid"))
        }
    };
}

cached_regex!(completion_marker, r"(?i)\b(done|completed|finished|all tests pass(?:ing)?|✅)\b");
cached_regex!(error_indicator, r"(?i)\b(error|exception|traceback|panic(?:ked)?|failed to|stack trace)\b");
cached_regex!(blocker_indicator, r"(?i)\b(blocked|waiting on|cannot proceed|unable to continue|pending (?:approval|decision))\b");
cached_regex!(placeholder_text, r"(?i)\b(TBD|TODO|FIXME|to be (?:determined|filled in)|lorem ipsum|N/A \(placeholder\))\b");
cached_regex!(test_results_mention, r"(?i)\b(tests? (?:pass|passed|passing|fail|failed|failing)|test suite|coverage)\b");
cached_regex!(handover_marker, r"(?i)\b(context window|running low on context|handing? off|handover|context exhaustion)\b");

/// Counts non-overlapping matches of `pattern` in `text`.
fn count_matches(pattern: &Regex, text: &str) -> usize {
    pattern.find_iter(text).count()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectedPatterns {
    pub completion_markers: usize,
    pub error_indicators: usize,
    pub blocker_indicators: usize,
    pub placeholder_mentions: usize,
    pub test_results_mentions: usize,
    pub handover_markers: usize,
}

/// Scans `text` once for every pattern family (spec.md §4.I.1's
/// `detectedPatterns` struct).
pub fn detect(text: &str) -> DetectedPatterns {
    DetectedPatterns {
        completion_markers: count_matches(completion_marker(), text),
        error_indicators: count_matches(error_indicator(), text),
        blocker_indicators: count_matches(blocker_indicator(), text),
        placeholder_mentions: count_matches(placeholder_text(), text),
        test_results_mentions: count_matches(test_results_mention(), text),
        handover_markers: count_matches(handover_marker(), text),
    }
}

pub fn contains_placeholder_text(text: &str) -> bool {
    placeholder_text().is_match(text)
}

pub fn mentions_test_results(text: &str) -> bool {
    test_results_mention().is_match(text)
}

pub fn mentions_handover(text: &str) -> bool {
    handover_marker().is_match(text)
}

/// Blocker-category keyword families (spec.md §4.I.3), tried in order —
/// first match wins. A `RegexSet` lets us classify with one scan instead of
/// probing each category's regex individually.
fn blocker_category_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)\b(third-party|external (?:api|service|dependency)|upstream|vendor)\b",
            r"(?i)\b(ambiguous|unclear|needs clarification|which approach|not specified)\b",
            r"(?i)\b(test(?:s)? fail|assertion failed|flaky test|regression)\b",
            r"(?i)\b(out of memory|disk (?:full|space)|rate limit(?:ed)?|quota exceeded|timeout)\b",
            r"(?i)\b(design decision|architecture choice|needs (?:sign.?off|review)|trade-?off)\b",
        ])
        .expect("static pattern set is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerCategory {
    ExternalDependency,
    AmbiguousRequirements,
    TestFailures,
    ResourceConstraints,
    DesignDecision,
    Unknown,
}

const BLOCKER_CATEGORY_ORDER: [BlockerCategory; 5] = [
    BlockerCategory::ExternalDependency,
    BlockerCategory::AmbiguousRequirements,
    BlockerCategory::TestFailures,
    BlockerCategory::ResourceConstraints,
    BlockerCategory::DesignDecision,
];

pub fn classify_blocker(text: &str) -> BlockerCategory {
    let matches = blocker_category_set().matches(text);
    BLOCKER_CATEGORY_ORDER.into_iter().find(|category| matches.matched(category_index(*category))).unwrap_or(BlockerCategory::Unknown)
}

/// Captures a referenced task id out of an `ExternalDependency` bullet, e.g.
/// "blocked by Task 2.2" or "waiting on task 2.2 output".
pub fn blocking_task_id(text: &str) -> Option<String> {
    cached_regex!(task_ref, r"(?i)task\s+([\d]+\.[\d]+)");
    task_ref().captures(text).map(|c| c[1].to_string())
}

fn category_index(category: BlockerCategory) -> usize {
    BLOCKER_CATEGORY_ORDER.iter().position(|c| *c == category).unwrap_or(usize::MAX)
}

impl BlockerCategory {
    /// Default severity for a freshly classified blocker. Resource
    /// exhaustion gets the top severity since it tends to stall every task
    /// on the same host, not just the one reporting it.
    pub fn default_severity(self) -> BlockerSeverity {
        match self {
            Self::ResourceConstraints => BlockerSeverity::Critical,
            Self::ExternalDependency | Self::TestFailures => BlockerSeverity::High,
            Self::AmbiguousRequirements | Self::DesignDecision => BlockerSeverity::Medium,
            Self::Unknown => BlockerSeverity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_completion_and_error_markers() {
        let patterns = detect("All tests passing. No errors encountered.");
        assert_eq!(patterns.completion_markers, 1);
        assert_eq!(patterns.error_indicators, 1);
    }

    #[test]
    fn placeholder_detection() {
        assert!(contains_placeholder_text("Output: TBD"));
        assert!(!contains_placeholder_text("Output: wired the database pool"));
    }

    #[test]
    fn classifies_external_dependency_blocker() {
        let category = classify_blocker("Blocked: waiting on the upstream vendor API to ship a fix.");
        assert_eq!(category, BlockerCategory::ExternalDependency);
        assert_eq!(category.default_severity(), BlockerSeverity::High);
    }

    #[test]
    fn classifies_test_failure_blocker_as_high_severity() {
        let category = classify_blocker("Blocked: three assertion failed in the integration suite.");
        assert_eq!(category, BlockerCategory::TestFailures);
        assert_eq!(category.default_severity(), BlockerSeverity::High);
    }

    #[test]
    fn unclassifiable_text_is_unknown() {
        assert_eq!(classify_blocker("Blocked: the cat knocked over the keyboard."), BlockerCategory::Unknown);
    }

    #[test]
    fn first_matching_category_wins_when_text_mentions_several() {
        let category = classify_blocker("Blocked: ambiguous requirements, but also tests fail intermittently.");
        assert_eq!(category, BlockerCategory::AmbiguousRequirements);
    }
}
