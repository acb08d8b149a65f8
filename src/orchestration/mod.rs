//! Orchestration loop: agent selection, prompt-context assembly, lifecycle
//! monitor wiring, and escalation (spec.md §4.J).

pub mod domain_map;
mod loop_;

pub use domain_map::{map_agent_assignment_to_domain, memory_log_path};
pub use loop_::{AssignmentPromptContext, OrchestrationLoop, OrchestrationLoopConfig, PromptRenderer, TickReport};
