//! Task graph: dependency validation, cycle detection, and the ready set.
//!
//! Edges run dependency → dependent. The graph is rebuilt from the task
//! list whenever a revision task is inserted; with at most a few hundred
//! tasks this costs nothing and keeps the task list the single source of
//! truth.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use elisa_types::{Task, TaskStatus};

/// Graph-level validation failures.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// An edge references a task id the planner never defined.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The dependent task.
        task: String,
        /// The missing dependency id.
        dependency: String,
    },
    /// The graph contains a dependency cycle.
    #[error("circular dependency detected involving task '{0}'")]
    Cycle(String),
}

/// Dependency adjacency over the session's task list.
#[derive(Debug)]
pub struct TaskGraph {
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build the graph, validating that every edge endpoint exists.
    pub fn from_tasks(tasks: &IndexMap<String, Task>) -> Result<Self, GraphError> {
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for task in tasks.values() {
            dependencies.insert(task.id.clone(), task.dependencies.clone());
            dependents.entry(task.id.clone()).or_default();
            for dep in &task.dependencies {
                if !tasks.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents.entry(dep.clone()).or_default().push(task.id.clone());
            }
        }

        Ok(Self { dependencies, dependents })
    }

    /// Find a task involved in a dependency cycle, if any.
    pub fn find_cycle(&self) -> Option<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut visiting: HashSet<&str> = HashSet::new();

        fn visit<'a>(
            id: &'a str,
            dependencies: &'a HashMap<String, Vec<String>>,
            visited: &mut HashSet<&'a str>,
            visiting: &mut HashSet<&'a str>,
        ) -> Option<String> {
            if visited.contains(id) {
                return None;
            }
            if !visiting.insert(id) {
                return Some(id.to_string());
            }
            if let Some(deps) = dependencies.get(id) {
                for dep in deps {
                    if let Some(cyclic) = visit(dep, dependencies, visited, visiting) {
                        return Some(cyclic);
                    }
                }
            }
            visiting.remove(id);
            visited.insert(id);
            None
        }

        let mut ids: Vec<&String> = self.dependencies.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(cyclic) = visit(id, &self.dependencies, &mut visited, &mut visiting) {
                debug!(task = %cyclic, "cycle detected");
                return Some(cyclic);
            }
        }
        None
    }

    /// Ids of tasks that are pending with every dependency satisfied,
    /// in task-list order.
    pub fn ready_ids(&self, tasks: &IndexMap<String, Task>) -> Vec<String> {
        tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.dependencies.iter().all(|dep| {
                    tasks
                        .get(dep)
                        .map(|d| dependency_satisfied(d.status))
                        .unwrap_or(false)
                })
            })
            .map(|task| task.id.clone())
            .collect()
    }

    /// Mark pending tasks blocked when any dependency failed or is blocked.
    /// Runs to a fixpoint so blockage propagates down chains.
    pub fn propagate_blocked(&self, tasks: &mut IndexMap<String, Task>) {
        loop {
            let newly_blocked: Vec<String> = tasks
                .values()
                .filter(|task| task.status == TaskStatus::Pending)
                .filter(|task| {
                    task.dependencies.iter().any(|dep| {
                        tasks
                            .get(dep)
                            .map(|d| matches!(d.status, TaskStatus::Failed | TaskStatus::Blocked))
                            .unwrap_or(false)
                    })
                })
                .map(|task| task.id.clone())
                .collect();
            if newly_blocked.is_empty() {
                return;
            }
            for id in newly_blocked {
                if let Some(task) = tasks.get_mut(&id) {
                    task.status = TaskStatus::Blocked;
                }
            }
        }
    }

    /// Direct dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether no task can make further progress.
    pub fn is_quiescent(&self, tasks: &IndexMap<String, Task>) -> bool {
        tasks.values().all(|t| t.status != TaskStatus::Running) && self.ready_ids(tasks).is_empty()
    }
}

/// A dependency is satisfied once completed, or once superseded by a
/// revision task (whose own completion gates the dependents).
fn dependency_satisfied(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Completed | TaskStatus::Revising)
}

/// Next free revision id for a failed task.
pub fn next_revision_id(failed_id: &str, tasks: &IndexMap<String, Task>) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{failed_id}-revision-{n}");
        if !tasks.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.into(),
            name: id.to_uppercase(),
            description: format!("do {id}"),
            status: TaskStatus::Pending,
            agent: "amy".into(),
            acceptance_criteria: vec![],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            summary: None,
            retries: 0,
        }
    }

    fn map(tasks: Vec<Task>) -> IndexMap<String, Task> {
        tasks.into_iter().map(|t| (t.id.clone(), t)).collect()
    }

    #[test]
    fn diamond_readiness_follows_completion() {
        let mut tasks = map(vec![
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t1"]),
            task("t4", &["t2", "t3"]),
        ]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();

        assert_eq!(graph.ready_ids(&tasks), vec!["t1"]);

        tasks.get_mut("t1").unwrap().status = TaskStatus::Completed;
        assert_eq!(graph.ready_ids(&tasks), vec!["t2", "t3"]);

        tasks.get_mut("t2").unwrap().status = TaskStatus::Completed;
        assert_eq!(graph.ready_ids(&tasks), vec!["t3"]);

        tasks.get_mut("t3").unwrap().status = TaskStatus::Completed;
        assert_eq!(graph.ready_ids(&tasks), vec!["t4"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let tasks = map(vec![task("t1", &["ghost"])]);
        let err = TaskGraph::from_tasks(&tasks).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn two_task_cycle_is_found() {
        let tasks = map(vec![task("a", &["b"]), task("b", &["a"])]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        assert!(graph.find_cycle().is_some());
    }

    #[test]
    fn self_cycle_is_found() {
        let tasks = map(vec![task("a", &["a"])]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        assert_eq!(graph.find_cycle(), Some("a".to_string()));
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let tasks = map(vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t1", "t2"])]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        assert_eq!(graph.find_cycle(), None);
    }

    #[test]
    fn failure_blocks_dependents_transitively() {
        let mut tasks = map(vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        tasks.get_mut("t1").unwrap().status = TaskStatus::Failed;
        graph.propagate_blocked(&mut tasks);
        assert_eq!(tasks["t2"].status, TaskStatus::Blocked);
        assert_eq!(tasks["t3"].status, TaskStatus::Blocked);
    }

    #[test]
    fn revising_dependency_satisfies_revision_task() {
        let mut tasks = map(vec![task("t1", &[]), task("t1-revision-1", &["t1"])]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        tasks.get_mut("t1").unwrap().status = TaskStatus::Revising;
        assert_eq!(graph.ready_ids(&tasks), vec!["t1-revision-1"]);
    }

    #[test]
    fn revision_ids_increment() {
        let mut tasks = map(vec![task("t1", &[])]);
        assert_eq!(next_revision_id("t1", &tasks), "t1-revision-1");
        tasks.insert("t1-revision-1".into(), task("t1-revision-1", &["t1"]));
        assert_eq!(next_revision_id("t1", &tasks), "t1-revision-2");
    }
}
