//! S4: frontmatter scope parsing, wildcard agent matching, and the
//! accumulating (not set-intersecting) semantics of scope intersection.

use apm_auto::plan::ScopeDefinition;

#[test]
fn frontmatter_range_and_wildcards_parse_and_match() {
    let frontmatter: serde_yaml::Value = serde_yaml::from_str(
        "phase: 2-4\nagents:\n  - Orchestration*\n  - Agent_Communication\n",
    )
    .unwrap();
    let (scope, warnings) = ScopeDefinition::from_frontmatter(&frontmatter).expect("valid frontmatter");
    assert!(warnings.is_empty());

    assert!(!scope.matches_phase(1));
    assert!(scope.matches_phase(2));
    assert!(scope.matches_phase(4));
    assert!(!scope.matches_phase(5));

    assert!(scope.matches_agent("Agent_Orchestration_CLI"));
    assert!(scope.matches_agent("Agent_Orchestration_Foundation"));
    assert!(scope.matches_agent("Agent_Communication"));
    assert!(!scope.matches_agent("Agent_QA"));
}

#[test]
fn intersecting_scopes_accumulates_agent_groups_and_narrows_phase() {
    let frontmatter: serde_yaml::Value = serde_yaml::from_str(
        "phase: 2-4\nagents:\n  - Orchestration*\n  - Agent_Communication\n",
    )
    .unwrap();
    let (base, _) = ScopeDefinition::from_frontmatter(&frontmatter).unwrap();

    let cli_scope = ScopeDefinition::parse_cli_arg("phase:3").unwrap();
    let cli_agent_scope = ScopeDefinition::parse_cli_arg("agent:*_CLI").unwrap();

    let narrowed = base.intersect(cli_scope).intersect(cli_agent_scope);

    assert!(narrowed.matches_phase(3));
    assert!(!narrowed.matches_phase(2));
    assert!(!narrowed.matches_phase(4));

    // Must satisfy every accumulated group: Orchestration*-or-Agent_Communication
    // AND *_CLI.
    assert!(narrowed.matches_agent("Agent_Orchestration_CLI"));
    // Matches *_CLI but neither Orchestration* nor Agent_Communication.
    assert!(!narrowed.matches_agent("Agent_QA_CLI"));
    // Matches Orchestration* but not *_CLI.
    assert!(!narrowed.matches_agent("Agent_Orchestration_Foundation"));
}

#[test]
fn unknown_frontmatter_fields_warn_without_failing() {
    let frontmatter: serde_yaml::Value = serde_yaml::from_str("phase: 1\nmystery_field: true\n").unwrap();
    let (_scope, warnings) = ScopeDefinition::from_frontmatter(&frontmatter).expect("unknown field must not fail parsing");
    assert!(warnings.iter().any(|w| w.contains("mystery_field")));
}

#[test]
fn malformed_cli_scope_argument_is_rejected() {
    let result = ScopeDefinition::parse_cli_arg("bogus-arg-without-colon");
    assert!(result.is_err());
}
