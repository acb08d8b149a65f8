//! Plan document parser (spec.md §4.G).
//!
//! The plan is a text file with a YAML frontmatter header followed by a
//! markdown body of phase and task headings. Grounded in the teacher's
//! YAML-frontmatter handling (`infrastructure/config/loader.rs`'s
//! figment/serde_yaml merge style, narrowed here to a single document) for
//! header parsing, and in the teacher's regex-based text-scanning services
//! (e.g. `application/branch_completion_detector.rs`) for the dependency
//! mining pattern family.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::errors::CoreError;
use crate::domain::models::TaskDependency;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPhase {
    pub number: u32,
    pub title: String,
    pub total_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTask {
    pub task_id: String,
    pub title: String,
    pub phase: String,
    pub agent_assignment: Option<String>,
    pub dependencies: Vec<TaskDependency>,
    pub objective: String,
    pub output: String,
    pub guidance: String,
    pub full_content: String,
}

#[derive(Debug, Clone)]
pub struct ParsedPlan {
    pub frontmatter: serde_yaml::Value,
    pub phases: Vec<ParsedPhase>,
    pub tasks: HashMap<String, ParsedTask>,
}

fn phase_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^##\s*Phase\s+(\d+)\s*[:.]?\s*(.*)$").unwrap())
}

fn task_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^###\s*Task\s+(\d+\.\d+)\s*[:.]?\s*(.*)$").unwrap())
}

fn field_line(name: &str) -> Regex {
    Regex::new(&format!(r"(?im)^\*\*{name}\*\*:\s*(.+)$")).unwrap()
}

/// `/Task ([\d.]+)\s+Output(?:\s+by\s+(Agent_\w+))?/ig` (spec.md §4.G),
/// mined from a task's free-form guidance text.
fn dependency_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Task\s+([\d.]+)\s+Output(?:\s+by\s+(Agent_\w+))?").unwrap())
}

/// Split `content` into `(frontmatter, body)`. Frontmatter is the YAML
/// between the first two `---` delimiter lines; absent frontmatter yields
/// `serde_yaml::Value::Null`.
fn split_frontmatter(content: &str) -> (serde_yaml::Value, &str) {
    let trimmed = content.trim_start();
    if let Some(rest) = trimmed.strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            let yaml_text = &rest[..end];
            let body = &rest[end + 4..];
            let value = serde_yaml::from_str(yaml_text).unwrap_or(serde_yaml::Value::Null);
            return (value, body.trim_start_matches('\n'));
        }
    }
    (serde_yaml::Value::Null, content)
}

pub fn parse_plan(content: &str) -> Result<ParsedPlan, CoreError> {
    let (frontmatter, body) = split_frontmatter(content);

    let mut phase_starts: Vec<(usize, u32, String)> =
        phase_heading().captures_iter(body).map(|c| (c.get(0).unwrap().start(), c[1].parse().unwrap_or(0), c[2].trim().to_string())).collect();
    phase_starts.sort_by_key(|(pos, _, _)| *pos);

    let mut task_starts: Vec<(usize, String, String)> =
        task_heading().captures_iter(body).map(|c| (c.get(0).unwrap().start(), c[1].to_string(), c[2].trim().to_string())).collect();
    task_starts.sort_by_key(|(pos, _, _)| *pos);

    let mut tasks = HashMap::new();
    for (idx, (start, task_id, title)) in task_starts.iter().enumerate() {
        let end = task_starts.get(idx + 1).map(|(p, _, _)| *p).unwrap_or(body.len());
        let block = &body[*start..end];

        let phase = phase_for_offset(&phase_starts, *start);
        let agent_assignment = field_line("Agent Assignment").captures(block).map(|c| c[1].trim().to_string());
        let objective = field_line("Objective").captures(block).map(|c| c[1].trim().to_string()).unwrap_or_default();
        let output = field_line("Output").captures(block).map(|c| c[1].trim().to_string()).unwrap_or_default();
        let guidance = field_line("Guidance").captures(block).map(|c| c[1].trim().to_string()).unwrap_or_default();

        let mut seen = std::collections::HashSet::new();
        let dependencies: Vec<TaskDependency> = dependency_mention()
            .captures_iter(block)
            .filter_map(|c| {
                let dep_id = c[1].to_string();
                if dep_id == *task_id || !seen.insert(dep_id.clone()) {
                    return None;
                }
                Some(TaskDependency::required(task_id.clone(), dep_id))
            })
            .collect();

        tasks.insert(
            task_id.clone(),
            ParsedTask {
                task_id: task_id.clone(),
                title: title.clone(),
                phase,
                agent_assignment,
                dependencies,
                objective,
                output,
                guidance,
                full_content: block.to_string(),
            },
        );
    }

    let phases = phase_starts
        .iter()
        .map(|(_, number, title)| {
            let total_tasks = tasks.values().filter(|t| t.phase == number.to_string()).count();
            ParsedPhase { number: *number, title: title.clone(), total_tasks }
        })
        .collect();

    Ok(ParsedPlan { frontmatter, phases, tasks })
}

fn phase_for_offset(phase_starts: &[(usize, u32, String)], offset: usize) -> String {
    phase_starts
        .iter()
        .rev()
        .find(|(pos, _, _)| *pos <= offset)
        .map(|(_, number, _)| number.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"---
phase: "1"
agents: "*"
---
## Phase 1: Foundation

### Task 1.1: Bootstrap the workspace
**Agent Assignment**: Agent_Foundation
**Objective**: Set up the crate skeleton.
**Output**: A compiling workspace.
**Guidance**: No dependencies yet.

### Task 1.2: Wire the CLI
**Agent Assignment**: Agent_CLI
**Objective**: Add the clap entrypoint.
**Output**: A runnable binary.
**Guidance**: Depends on Task 1.1 Output by Agent_Foundation.
"#;

    #[test]
    fn parses_phases_and_tasks() {
        let plan = parse_plan(SAMPLE).unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].number, 1);
        assert_eq!(plan.phases[0].total_tasks, 2);
        assert_eq!(plan.tasks.len(), 2);

        let task_1_2 = &plan.tasks["1.2"];
        assert_eq!(task_1_2.agent_assignment.as_deref(), Some("Agent_CLI"));
        assert_eq!(task_1_2.dependencies.len(), 1);
        assert_eq!(task_1_2.dependencies[0].depends_on_task_id, "1.1");
    }

    #[test]
    fn frontmatter_is_captured() {
        let plan = parse_plan(SAMPLE).unwrap();
        assert_eq!(plan.frontmatter.get("phase").and_then(|v| v.as_str()), Some("1"));
    }

    #[test]
    fn dependency_mentions_deduplicate() {
        let content = "### Task 2.1: X\n**Guidance**: See Task 1.1 Output and again Task 1.1 Output by Agent_Foundation.\n";
        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.tasks["2.1"].dependencies.len(), 1);
    }

    #[test]
    fn missing_frontmatter_is_tolerated() {
        let plan = parse_plan("## Phase 1: X\n### Task 1.1: Y\n").unwrap();
        assert_eq!(plan.frontmatter, serde_yaml::Value::Null);
        assert_eq!(plan.tasks.len(), 1);
    }
}
