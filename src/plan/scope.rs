//! Scope frontmatter and CLI scope-grammar parsing (spec.md §4.G, §6).
//!
//! Grounded in the teacher's hand-rolled `ConfigLoader::validate` style of
//! reporting every validation failure with a field path, applied here to
//! the plan frontmatter's `phase`/`tasks`/`agents`/`tags` fields and to the
//! `phase:N|N-M`, `task:P.T[,P.T]*`, `agent:<pattern>` CLI scope grammar of
//! spec.md §6.

use std::collections::HashSet;

use crate::domain::errors::CoreError;

const KNOWN_FIELDS: [&str; 4] = ["phase", "tasks", "agents", "tags"];

/// An inclusive phase range, e.g. `2-4` or the single-phase shorthand `3`
/// (equivalent to `3-3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRange {
    pub start: u32,
    pub end: u32,
}

impl PhaseRange {
    pub fn single(n: u32) -> Self {
        Self { start: n, end: n }
    }

    pub fn contains(self, phase: u32) -> bool {
        phase >= self.start && phase <= self.end
    }

    /// Ranges widen under union (spec.md §4.G).
    fn union(self, other: Self) -> Self {
        Self { start: self.start.min(other.start), end: self.end.max(other.end) }
    }

    /// Ranges overlap under intersection (spec.md §4.G). A non-overlapping
    /// pair collapses to an empty range (`start > end`), matching nothing.
    fn intersect(self, other: Self) -> Self {
        Self { start: self.start.max(other.start), end: self.end.min(other.end) }
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Some((start, end)) = raw.split_once('-') {
            let start: u32 = start.trim().parse().map_err(|_| format!("invalid phase range {raw:?}"))?;
            let end: u32 = end.trim().parse().map_err(|_| format!("invalid phase range {raw:?}"))?;
            if start > end {
                return Err(format!("phase range {raw:?} has start > end"));
            }
            Ok(Self { start, end })
        } else {
            let n: u32 = raw.parse().map_err(|_| format!("invalid phase {raw:?}"))?;
            Ok(Self::single(n))
        }
    }
}

/// A wildcard agent-name pattern, pre-compiled to an anchored regex
/// (spec.md §4.G: `*` -> `.*`, metacharacters escaped, anchored both ends).
#[derive(Debug, Clone)]
pub struct AgentPattern {
    raw: String,
    regex: regex::Regex,
}

impl AgentPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut pattern = String::from("^");
        let mut parts = raw.split('*').peekable();
        while let Some(part) = parts.next() {
            pattern.push_str(&regex::escape(part));
            if parts.peek().is_some() {
                pattern.push_str(".*");
            }
        }
        pattern.push('$');
        let regex = regex::Regex::new(&pattern).unwrap_or_else(|_| regex::Regex::new("$^").unwrap());
        Self { raw, regex }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for AgentPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// A scope filter parsed from plan frontmatter or a CLI `start` argument.
/// An empty/default `ScopeDefinition` matches everything.
#[derive(Debug, Clone, Default)]
pub struct ScopeDefinition {
    pub phase: Option<PhaseRange>,
    pub tasks: Option<HashSet<String>>,
    /// Groups of OR'd patterns. Matching an agent requires at least one
    /// pattern in *every* group to match — see `union`/`intersect` below
    /// for how groups are combined, and DESIGN.md for the accumulation
    /// semantics called out in spec.md §9's Open Questions.
    pub agent_groups: Vec<Vec<AgentPattern>>,
    pub tags: Option<HashSet<String>>,
}

impl ScopeDefinition {
    /// Parse the plan's YAML frontmatter into a `ScopeDefinition`, collecting
    /// every validation failure (field-pathed) rather than stopping at the
    /// first, and returning warnings for unrecognized fields rather than
    /// failing (spec.md §4.G).
    pub fn from_frontmatter(value: &serde_yaml::Value) -> Result<(Self, Vec<String>), CoreError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut scope = ScopeDefinition::default();

        let serde_yaml::Value::Mapping(map) = value else {
            return Ok((scope, warnings));
        };

        for (key, raw_value) in map {
            let Some(field) = key.as_str() else { continue };
            if !KNOWN_FIELDS.contains(&field) {
                warnings.push(format!("scope.{field}: unrecognized field, ignored"));
                continue;
            }
            match field {
                "phase" => match parse_phase_field(raw_value) {
                    Ok(range) => scope.phase = Some(range),
                    Err(e) => errors.push(format!("scope.phase: {e}")),
                },
                "tasks" => match parse_string_list(raw_value) {
                    Ok(list) => scope.tasks = Some(list.into_iter().map(normalize_task_id).collect()),
                    Err(e) => errors.push(format!("scope.tasks: {e}")),
                },
                "agents" => match parse_string_list(raw_value) {
                    Ok(list) => scope.agent_groups = vec![list.into_iter().map(AgentPattern::new).collect()],
                    Err(e) => errors.push(format!("scope.agents: {e}")),
                },
                "tags" => match parse_string_list(raw_value) {
                    Ok(list) => scope.tags = Some(list.into_iter().collect()),
                    Err(e) => errors.push(format!("scope.tags: {e}")),
                },
                _ => unreachable!("filtered by KNOWN_FIELDS"),
            }
        }

        if !errors.is_empty() {
            return Err(CoreError::ValidationError(errors));
        }
        Ok((scope, warnings))
    }

    /// Parse one `phase:N|N-M`, `task:P.T[,P.T]*`, or `agent:<pattern>` CLI
    /// scope argument (spec.md §6). Returns a usage error (exit code 2 at
    /// the CLI boundary) on malformed input.
    pub fn parse_cli_arg(arg: &str) -> Result<Self, CoreError> {
        let (kind, value) = arg.split_once(':').ok_or_else(|| {
            CoreError::ValidationError(vec![format!(
                "scope argument {arg:?}: expected `phase:`, `task:`, or `agent:` prefix"
            )])
        })?;

        match kind {
            "phase" => {
                let range = PhaseRange::parse(value).map_err(|e| CoreError::ValidationError(vec![e]))?;
                Ok(Self { phase: Some(range), ..Default::default() })
            }
            "task" => {
                let tasks: HashSet<String> = value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(normalize_task_id).collect();
                if tasks.is_empty() {
                    return Err(CoreError::ValidationError(vec![format!("scope argument {arg:?}: no task ids given")]));
                }
                Ok(Self { tasks: Some(tasks), ..Default::default() })
            }
            "agent" => {
                if value.is_empty() {
                    return Err(CoreError::ValidationError(vec![format!("scope argument {arg:?}: empty agent pattern")]));
                }
                Ok(Self { agent_groups: vec![vec![AgentPattern::new(value)]], ..Default::default() })
            }
            other => Err(CoreError::ValidationError(vec![format!("scope argument {arg:?}: unknown kind {other:?}")])),
        }
    }

    pub fn matches_phase(&self, phase: u32) -> bool {
        self.phase.map_or(true, |range| range.contains(phase))
    }

    pub fn matches_task(&self, task_id: &str) -> bool {
        self.tasks.as_ref().map_or(true, |set| set.contains(task_id))
    }

    /// An agent matches iff every accumulated group contains at least one
    /// matching pattern. No groups means no agent constraint.
    pub fn matches_agent(&self, name: &str) -> bool {
        self.agent_groups.iter().all(|group| group.iter().any(|p| p.matches(name)))
    }

    /// Broadens `self` with `other`: phase ranges widen, task/tag lists
    /// merge as a set union, and agent patterns flatten into a single OR'd
    /// group (an unconstrained side stays unconstrained, since union can
    /// never narrow).
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            phase: option_combine(self.phase, other.phase, PhaseRange::union),
            tasks: option_union(self.tasks, other.tasks),
            agent_groups: groups_union(self.agent_groups, other.agent_groups),
            tags: option_union(self.tags, other.tags),
        }
    }

    /// Narrows `self` with `other`: phase ranges overlap, task/tag lists
    /// intersect as a set, and agent pattern groups **accumulate** — both
    /// sides' groups must each match, rather than intersecting the pattern
    /// lists themselves (spec.md §4.G / §9 Open Questions).
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        Self {
            phase: option_combine(self.phase, other.phase, PhaseRange::intersect),
            tasks: option_intersect(self.tasks, other.tasks),
            agent_groups: groups_intersect(self.agent_groups, other.agent_groups),
            tags: option_intersect(self.tags, other.tags),
        }
    }
}

fn normalize_task_id(raw: impl AsRef<str>) -> String {
    raw.as_ref().trim().to_string()
}

fn parse_phase_field(value: &serde_yaml::Value) -> Result<PhaseRange, String> {
    let raw = match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => return Err(format!("expected a string or number, got {other:?}")),
    };
    PhaseRange::parse(&raw)
}

fn parse_string_list(value: &serde_yaml::Value) -> Result<Vec<String>, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(vec![s.clone()]),
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| format!("expected a string list, found {v:?}")))
            .collect(),
        other => Err(format!("expected a string or list of strings, got {other:?}")),
    }
}

fn option_combine<T: Copy>(a: Option<T>, b: Option<T>, combine: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(combine(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn option_union(a: Option<HashSet<String>>, b: Option<HashSet<String>>) -> Option<HashSet<String>> {
    match (a, b) {
        // An unconstrained side stays unconstrained: union can only broaden.
        (None, _) | (_, None) => None,
        (Some(a), Some(b)) => Some(a.union(&b).cloned().collect()),
    }
}

fn option_intersect(a: Option<HashSet<String>>, b: Option<HashSet<String>>) -> Option<HashSet<String>> {
    match (a, b) {
        (None, None) => None,
        (Some(set), None) | (None, Some(set)) => Some(set),
        (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
    }
}

fn groups_union(a: Vec<Vec<AgentPattern>>, b: Vec<Vec<AgentPattern>>) -> Vec<Vec<AgentPattern>> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut flattened: Vec<AgentPattern> = a.into_iter().flatten().collect();
    flattened.extend(b.into_iter().flatten());
    vec![flattened]
}

fn groups_intersect(a: Vec<Vec<AgentPattern>>, b: Vec<Vec<AgentPattern>>) -> Vec<Vec<AgentPattern>> {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let mut groups = a;
    groups.extend(b);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_range_parses_single_and_range() {
        assert_eq!(PhaseRange::parse("3").unwrap(), PhaseRange { start: 3, end: 3 });
        assert_eq!(PhaseRange::parse("2-4").unwrap(), PhaseRange { start: 2, end: 4 });
        assert!(PhaseRange::parse("4-2").is_err());
        assert!(PhaseRange::parse("nope").is_err());
    }

    #[test]
    fn wildcard_pattern_is_anchored() {
        let pattern = AgentPattern::new("Agent_Orchestration_*");
        assert!(pattern.matches("Agent_Orchestration_CLI"));
        assert!(pattern.matches("Agent_Orchestration_Foundation"));
        assert!(!pattern.matches("Agent_QA"));

        let suffix = AgentPattern::new("*_CLI");
        assert!(suffix.matches("Agent_Orchestration_CLI"));
        assert!(!suffix.matches("Agent_Orchestration_Foundation"));
    }

    #[test]
    fn frontmatter_parses_known_fields_and_warns_on_unknown() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            "phase: 2-4\nagents:\n  - Agent_Orchestration_*\n  - Agent_Communication\nbogus: true\n",
        )
        .unwrap();
        let (scope, warnings) = ScopeDefinition::from_frontmatter(&yaml).unwrap();
        assert_eq!(scope.phase, Some(PhaseRange { start: 2, end: 4 }));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bogus"));
        assert!(scope.matches_agent("Agent_Orchestration_CLI"));
        assert!(scope.matches_agent("Agent_Communication"));
        assert!(!scope.matches_agent("Agent_QA"));
    }

    #[test]
    fn union_widens_phase_and_merges_agent_patterns() {
        let a = ScopeDefinition { phase: Some(PhaseRange::single(2)), ..Default::default() };
        let b = ScopeDefinition { phase: Some(PhaseRange::single(4)), ..Default::default() };
        let merged = a.union(b);
        assert_eq!(merged.phase, Some(PhaseRange { start: 2, end: 4 }));
    }

    #[test]
    fn intersect_accumulates_agent_groups_requiring_all_to_match() {
        let a = ScopeDefinition {
            agent_groups: vec![vec![AgentPattern::new("Agent_Orchestration_*"), AgentPattern::new("Agent_Communication")]],
            ..Default::default()
        };
        let b = ScopeDefinition { agent_groups: vec![vec![AgentPattern::new("*_CLI")]], ..Default::default() };
        let narrowed = a.intersect(b);
        assert_eq!(narrowed.agent_groups.len(), 2);

        // Matches the first group via "Agent_Orchestration_*" and the
        // second via "*_CLI".
        assert!(narrowed.matches_agent("Agent_Orchestration_CLI"));
        // Matches only the first group; fails the second.
        assert!(!narrowed.matches_agent("Agent_Orchestration_Foundation"));
        // Matches neither group.
        assert!(!narrowed.matches_agent("Agent_QA"));
    }

    #[test]
    fn unconstrained_scope_matches_everything() {
        let scope = ScopeDefinition::default();
        assert!(scope.matches_phase(7));
        assert!(scope.matches_task("9.9"));
        assert!(scope.matches_agent("anything"));
    }

    #[test]
    fn cli_arg_parses_each_kind() {
        let phase = ScopeDefinition::parse_cli_arg("phase:2-4").unwrap();
        assert_eq!(phase.phase, Some(PhaseRange { start: 2, end: 4 }));

        let task = ScopeDefinition::parse_cli_arg("task:1.1,1.2").unwrap();
        assert_eq!(task.tasks.unwrap().len(), 2);

        let agent = ScopeDefinition::parse_cli_arg("agent:Agent_QA*").unwrap();
        assert!(agent.matches_agent("Agent_QA"));

        assert!(ScopeDefinition::parse_cli_arg("bogus").is_err());
        assert!(ScopeDefinition::parse_cli_arg("phase:x-y").is_err());
    }
}
