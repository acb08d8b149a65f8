//! S3: a diamond-shaped dependency DAG batches correctly, readiness
//! respects required-only dependencies, and a closing edge is caught as a
//! cycle by both the detector and the topological sort.

use apm_auto::plan::{parse_plan, DependencyGraph};

const PLAN: &str = "\
## Phase 1: Foundation

### Task 1.1: Bootstrap the schema
**Agent Assignment**: Agent_Orchestration_Foundation
**Objective**: stand up the base tables
**Output**: migrated database

### Task 1.2: Wire the pool
**Agent Assignment**: Agent_Orchestration_Foundation
**Objective**: add a connection pool
**Output**: pooled connections
**Guidance**: Depends on Task 1.1 Output.

### Task 1.3: Wire the event bus
**Agent Assignment**: Agent_Communication
**Objective**: add a pub/sub bus
**Output**: typed event bus
**Guidance**: Depends on Task 1.1 Output.

### Task 1.4: Join pool and bus
**Agent Assignment**: Agent_Orchestration_Foundation
**Objective**: wire both together
**Output**: integrated core
**Guidance**: Depends on Task 1.2 Output and Task 1.3 Output.
";

#[test]
fn diamond_dag_batches_in_dependency_order() {
    let plan = parse_plan(PLAN).expect("parse plan");
    let tasks: Vec<_> = plan.tasks.values().cloned().collect();
    let graph = DependencyGraph::build(&tasks);

    let batches = graph.build_execution_batches().expect("acyclic graph");
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0], vec!["1.1".to_string()]);
    let mut middle = batches[1].clone();
    middle.sort();
    assert_eq!(middle, vec!["1.2".to_string(), "1.3".to_string()]);
    assert_eq!(batches[2], vec!["1.4".to_string()]);

    let completed: std::collections::HashSet<String> = ["1.1".to_string()].into_iter().collect();
    let in_progress: std::collections::HashSet<String> = ["1.2".to_string()].into_iter().collect();
    let ready = graph.get_ready_tasks(&completed, Some(&in_progress));
    assert_eq!(ready, vec!["1.3".to_string()]);
}

#[test]
fn closing_edge_is_detected_as_a_cycle() {
    let plan = parse_plan(PLAN).expect("parse plan");
    let mut tasks: Vec<_> = plan.tasks.values().cloned().collect();

    // Close 1.1 -> 1.4 -> 1.1 by adding a required back-edge onto 1.1.
    let task_1_1 = tasks.iter_mut().find(|t| t.task_id == "1.1").unwrap();
    task_1_1.dependencies.push(apm_auto::domain::models::TaskDependency {
        task_id: "1.1".to_string(),
        depends_on_task_id: "1.4".to_string(),
        dependency_type: apm_auto::domain::models::DependencyType::Required,
        description: None,
    });

    let graph = DependencyGraph::build(&tasks);
    assert!(graph.topological_sort().is_empty(), "cyclic graph must yield an empty topological sort");
    assert!(!graph.detect_circular_dependencies().is_empty(), "cycle detector must report at least one cycle");
}
