//! `Agent_<Name>` → [`AgentDomain`] mapping table (SPEC_FULL.md GLOSSARY,
//! referenced by spec.md §4.J step 2).

use crate::domain::models::AgentDomain;

/// Map a plan task's `agentAssignment` string (e.g. `Agent_Orchestration_CLI`)
/// to the fixed [`AgentDomain`] enumeration. Any `Agent_*` name not in the
/// table maps to `General` (spec.md GLOSSARY: "any other `Agent_*` maps to
/// General").
pub fn map_agent_assignment_to_domain(assignment: &str) -> AgentDomain {
    match assignment {
        "Agent_Orchestration_Foundation" => AgentDomain::Foundation,
        "Agent_Orchestration_CLI" => AgentDomain::Cli,
        "Agent_Communication" => AgentDomain::Communication,
        "Agent_Automation" => AgentDomain::Automation,
        "Agent_Parallel" => AgentDomain::Parallel,
        "Agent_QA" => AgentDomain::Qa,
        "Agent_Monitoring" => AgentDomain::Monitoring,
        "Agent_Session" => AgentDomain::Session,
        "Agent_Config" => AgentDomain::Config,
        "Agent_Docs" => AgentDomain::Docs,
        _ => AgentDomain::General,
    }
}

/// Build the memory-log path for a task (spec.md §4.J "Memory-log path
/// convention"): `<base>/Phase_<NN>_<phase_title_underscored>/Task_<P>_<T>_
/// <title_slug>.md`. Phase is left-padded to two digits; the slug strips
/// punctuation and collapses whitespace to `_`.
pub fn memory_log_path(base: &str, phase_number: u32, phase_title: &str, task_id: &str, task_title: &str) -> String {
    let phase_dir = format!("Phase_{:02}_{}", phase_number, underscore(phase_title));
    let slug = slugify(task_title);
    let (p, t) = task_id.split_once('.').unwrap_or((task_id, "0"));
    format!("{base}/{phase_dir}/Task_{p}_{t}_{slug}.md")
}

fn underscore(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Strip punctuation, collapse internal whitespace to single underscores.
fn slugify(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_assignments_map_correctly() {
        assert_eq!(map_agent_assignment_to_domain("Agent_Orchestration_Foundation"), AgentDomain::Foundation);
        assert_eq!(map_agent_assignment_to_domain("Agent_Orchestration_CLI"), AgentDomain::Cli);
        assert_eq!(map_agent_assignment_to_domain("Agent_QA"), AgentDomain::Qa);
    }

    #[test]
    fn unknown_assignment_maps_to_general() {
        assert_eq!(map_agent_assignment_to_domain("Agent_Something_Else"), AgentDomain::General);
        assert_eq!(map_agent_assignment_to_domain("Agent_Custom_Thing"), AgentDomain::General);
    }

    #[test]
    fn memory_log_path_pads_phase_and_slugs_title() {
        let path = memory_log_path(".apm/Memory", 2, "Core Infrastructure", "2.3", "Build the Connection Pool!");
        assert_eq!(path, ".apm/Memory/Phase_02_Core_Infrastructure/Task_2_3_Build_the_Connection_Pool.md");
    }
}
