//! `apm-auto status --json` output schema (SPEC_FULL.md §6 supplement):
//! counts of agents by status, tasks by status, the current batch index,
//! and recovery statistics — the natural content of an orchestrator status
//! report, since every field is already tracked by another component.

use std::collections::HashMap;

use comfy_table::{presets, Cell, ContentArrangement, Table};
use serde::Serialize;

use crate::recovery::RecoveryStats;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentCounts {
    pub by_status: HashMap<String, u64>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskCounts {
    pub by_status: HashMap<String, u64>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub total_crashes: u64,
    pub total_attempts: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub success_rate: f64,
}

impl From<&RecoveryStats> for RecoveryReport {
    fn from(stats: &RecoveryStats) -> Self {
        Self {
            total_crashes: stats.total_crashes,
            total_attempts: stats.total_attempts,
            successful_recoveries: stats.successful_recoveries,
            failed_recoveries: stats.failed_recoveries,
            success_rate: stats.success_rate(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub agents: AgentCounts,
    pub tasks: TaskCounts,
    pub current_batch_index: Option<usize>,
    pub total_batches: Option<usize>,
    pub recovery: RecoveryReport,
}

/// Print the report to stdout, as JSON when `json` is set, otherwise as a
/// `comfy-table` summary (grounded in the teacher's `cli/display/table.rs`
/// preset style, using `console`/`comfy_table` rather than the teacher's
/// `colored` crate since that's what this crate's dependency stack carries).
pub fn print_status(report: &StatusReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("failed to serialize status report: {err}"),
        }
        return;
    }

    println!("{}", console::style("Agents").bold());
    println!("{}", agent_table(&report.agents));
    println!();
    println!("{}", console::style("Tasks").bold());
    println!("{}", task_table(&report.tasks));
    println!();
    if let (Some(current), Some(total)) = (report.current_batch_index, report.total_batches) {
        println!("Batch {}/{}", current + 1, total);
    }
    println!();
    println!("{}", console::style("Recovery").bold());
    println!(
        "crashes={} attempts={} succeeded={} failed={} success_rate={:.1}%",
        report.recovery.total_crashes,
        report.recovery.total_attempts,
        report.recovery.successful_recoveries,
        report.recovery.failed_recoveries,
        report.recovery.success_rate * 100.0,
    );
}

fn agent_table(counts: &AgentCounts) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING).set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("STATUS"), Cell::new("COUNT")]);
    let mut rows: Vec<_> = counts.by_status.iter().collect();
    rows.sort_by_key(|(status, _)| status.to_string());
    for (status, count) in rows {
        table.add_row(vec![status.clone(), count.to_string()]);
    }
    table.add_row(vec!["total".to_string(), counts.total.to_string()]);
    table
}

fn task_table(counts: &TaskCounts) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING).set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("STATUS"), Cell::new("COUNT")]);
    let mut rows: Vec<_> = counts.by_status.iter().collect();
    rows.sort_by_key(|(status, _)| status.to_string());
    for (status, count) in rows {
        table.add_row(vec![status.clone(), count.to_string()]);
    }
    table.add_row(vec!["total".to_string(), counts.total.to_string()]);
    table
}
