//! Dependency DAG over parsed plan tasks (spec.md §4.H).
//!
//! Direct generalization of the teacher's `services/dependency_resolver.rs`
//! (`DependencyResolver`, Kahn's algorithm via a pop-from-`Vec` queue, DFS
//! cycle detection with path reconstruction via `rec_stack`/`path`,
//! standalone recursive depth helper) from `Uuid` task ids to the plan's
//! `"P.T"` string ids, and from a single optional dependency list to typed
//! required/optional edges.

use std::collections::{HashMap, HashSet};

use crate::domain::models::DependencyType;
use crate::plan::parser::ParsedTask;

/// One node in the dependency graph. Dangling edges (a dependency target
/// with no corresponding task) are kept in `dependencies` but never gain a
/// node of their own — they simply never complete (spec.md §4.H).
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub task_id: String,
    pub dependencies: Vec<String>,
    pub required_dependencies: HashSet<String>,
    pub dependents: Vec<String>,
    pub phase: String,
    pub agent_assignment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn build(tasks: &[ParsedTask]) -> Self {
        let mut nodes: HashMap<String, DependencyNode> = tasks
            .iter()
            .map(|t| {
                (
                    t.task_id.clone(),
                    DependencyNode {
                        task_id: t.task_id.clone(),
                        dependencies: t.dependencies.iter().map(|d| d.depends_on_task_id.clone()).collect(),
                        required_dependencies: t
                            .dependencies
                            .iter()
                            .filter(|d| d.dependency_type == DependencyType::Required)
                            .map(|d| d.depends_on_task_id.clone())
                            .collect(),
                        dependents: Vec::new(),
                        phase: t.phase.clone(),
                        agent_assignment: t.agent_assignment.clone(),
                    },
                )
            })
            .collect();

        let edges: Vec<(String, String)> = nodes
            .values()
            .flat_map(|n| n.dependencies.iter().map(move |dep| (n.task_id.clone(), dep.clone())))
            .collect();

        for (task_id, dep_id) in edges {
            if let Some(dep_node) = nodes.get_mut(&dep_id) {
                dep_node.dependents.push(task_id);
            }
        }

        Self { nodes }
    }

    pub fn node(&self, task_id: &str) -> Option<&DependencyNode> {
        self.nodes.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm over all (required + optional) edges. Returns an
    /// empty vec iff the graph contains a cycle (spec.md §4.H).
    pub fn topological_sort(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if self.nodes.contains_key(dep) {
                    *in_degree.get_mut(node.task_id.as_str()).unwrap() += 1;
                }
            }
        }

        let mut queue: Vec<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
        queue.sort_unstable();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop() {
            sorted.push(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(dependent.as_str());
                            queue.sort_unstable();
                        }
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            Vec::new()
        } else {
            sorted
        }
    }

    /// DFS with colour marking; returns one path per disjoint cycle found.
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut cycles = Vec::new();

        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();

        for id in ids {
            if !visited.contains(id) {
                let mut rec_stack = HashSet::new();
                let mut path = Vec::new();
                self.dfs_cycles(id, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn dfs_cycles<'a>(
        &'a self,
        node_id: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node_id);
        rec_stack.insert(node_id);
        path.push(node_id);

        if let Some(node) = self.nodes.get(node_id) {
            for dep in &node.dependencies {
                let dep_id = dep.as_str();
                if !self.nodes.contains_key(dep_id) {
                    continue; // dangling edge, never part of a cycle
                }
                if !visited.contains(dep_id) {
                    self.dfs_cycles(dep_id, visited, rec_stack, path, cycles);
                } else if rec_stack.contains(dep_id) {
                    if let Some(start) = path.iter().position(|&id| id == dep_id) {
                        cycles.push(path[start..].iter().map(|s| s.to_string()).collect());
                    }
                }
            }
        }

        rec_stack.remove(node_id);
        path.pop();
    }

    /// Repeated extraction of the current zero-indegree frontier; each
    /// extraction is one batch. Ties within a batch are lexicographic.
    /// Returns `Err` with the ids that never reach zero indegree if a cycle
    /// remains.
    pub fn build_execution_batches(&self) -> Result<Vec<Vec<String>>, Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if self.nodes.contains_key(dep) {
                    *in_degree.get_mut(node.task_id.as_str()).unwrap() += 1;
                }
            }
        }

        let mut batches = Vec::new();
        let mut remaining = in_degree.clone();

        loop {
            let mut frontier: Vec<&str> = remaining.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
            if frontier.is_empty() {
                break;
            }
            frontier.sort_unstable();

            for id in &frontier {
                remaining.remove(id);
            }
            for id in &frontier {
                if let Some(node) = self.nodes.get(*id) {
                    for dependent in &node.dependents {
                        if let Some(degree) = remaining.get_mut(dependent.as_str()) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }
            batches.push(frontier.into_iter().map(String::from).collect());
        }

        if !remaining.is_empty() {
            let mut stuck: Vec<String> = remaining.keys().map(|s| s.to_string()).collect();
            stuck.sort_unstable();
            return Err(stuck);
        }

        Ok(batches)
    }

    /// Edges whose endpoints have different `agentAssignment`.
    pub fn find_cross_agent_dependencies(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort_unstable();

        for id in ids {
            let node = &self.nodes[id];
            for dep_id in &node.dependencies {
                if let Some(dep_node) = self.nodes.get(dep_id) {
                    if node.agent_assignment != dep_node.agent_assignment {
                        pairs.push((node.task_id.clone(), dep_id.clone()));
                    }
                }
            }
        }
        pairs
    }

    /// A task is ready iff it is in neither `completed` nor `in_progress`
    /// and every **required** dependency is in `completed`. Optional
    /// dependencies never block readiness; dangling required dependencies
    /// keep the task permanently not-ready.
    pub fn is_task_ready(&self, task_id: &str, completed: &HashSet<String>, in_progress: Option<&HashSet<String>>) -> bool {
        if completed.contains(task_id) {
            return false;
        }
        if let Some(in_progress) = in_progress {
            if in_progress.contains(task_id) {
                return false;
            }
        }
        match self.nodes.get(task_id) {
            Some(node) => node.required_dependencies.iter().all(|dep| completed.contains(dep)),
            None => false,
        }
    }

    pub fn get_ready_tasks(&self, completed: &HashSet<String>, in_progress: Option<&HashSet<String>>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| self.is_task_ready(id, completed, in_progress))
            .cloned()
            .collect();
        ready.sort_unstable();
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskDependency;

    fn task(id: &str, deps: Vec<TaskDependency>) -> ParsedTask {
        ParsedTask {
            task_id: id.to_string(),
            title: id.to_string(),
            phase: "1".to_string(),
            agent_assignment: Some("Agent_Foundation".to_string()),
            dependencies: deps,
            objective: String::new(),
            output: String::new(),
            guidance: String::new(),
            full_content: String::new(),
        }
    }

    #[test]
    fn topological_sort_orders_dependencies_before_dependents() {
        let tasks = vec![
            task("1.3", vec![TaskDependency::required("1.3", "1.2")]),
            task("1.1", vec![]),
            task("1.2", vec![TaskDependency::required("1.2", "1.1")]),
        ];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.topological_sort(), vec!["1.1", "1.2", "1.3"]);
    }

    #[test]
    fn cycle_makes_topological_sort_empty() {
        let tasks = vec![
            task("1.1", vec![TaskDependency::required("1.1", "1.2")]),
            task("1.2", vec![TaskDependency::required("1.2", "1.1")]),
        ];
        let graph = DependencyGraph::build(&tasks);
        assert!(graph.topological_sort().is_empty());
        assert_eq!(graph.detect_circular_dependencies().len(), 1);
    }

    #[test]
    fn execution_batches_group_independent_tasks() {
        let tasks = vec![
            task("1.1", vec![]),
            task("1.2", vec![]),
            task("1.3", vec![TaskDependency::required("1.3", "1.1"), TaskDependency::required("1.3", "1.2")]),
        ];
        let graph = DependencyGraph::build(&tasks);
        let batches = graph.build_execution_batches().unwrap();
        assert_eq!(batches, vec![vec!["1.1".to_string(), "1.2".to_string()], vec!["1.3".to_string()]]);
    }

    #[test]
    fn optional_dependency_does_not_block_readiness() {
        let tasks = vec![task("1.1", vec![]), task("1.2", vec![TaskDependency::optional("1.2", "1.1")])];
        let graph = DependencyGraph::build(&tasks);
        let completed = HashSet::new();
        assert!(graph.is_task_ready("1.2", &completed, None));
    }

    #[test]
    fn required_dangling_dependency_never_becomes_ready() {
        let tasks = vec![task("1.1", vec![TaskDependency::required("1.1", "9.9")])];
        let graph = DependencyGraph::build(&tasks);
        let completed = HashSet::new();
        assert!(!graph.is_task_ready("1.1", &completed, None));
        assert_eq!(graph.node("1.1").unwrap().dependencies, vec!["9.9".to_string()]);
        assert!(graph.node("9.9").is_none());
    }

    #[test]
    fn cross_agent_dependency_is_reported() {
        let mut dependent = task("1.2", vec![TaskDependency::required("1.2", "1.1")]);
        dependent.agent_assignment = Some("Agent_QA".to_string());
        let tasks = vec![task("1.1", vec![]), dependent];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.find_cross_agent_dependencies(), vec![("1.2".to_string(), "1.1".to_string())]);
    }

    #[test]
    fn ready_tasks_excludes_in_progress() {
        let tasks = vec![task("1.1", vec![]), task("1.2", vec![])];
        let graph = DependencyGraph::build(&tasks);
        let completed = HashSet::new();
        let in_progress: HashSet<String> = ["1.1".to_string()].into_iter().collect();
        assert_eq!(graph.get_ready_tasks(&completed, Some(&in_progress)), vec!["1.2".to_string()]);
    }
}
