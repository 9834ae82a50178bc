//! Task graph for dependency management.
//!
//! This module provides the TaskGraph structure that represents "must
//! complete before" relations between tasks as a directed acyclic graph,
//! enabling parallel execution of independent chains.

use crate::core::task::{OperationKind, ResourceId, TaskNode};
use crate::error::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// The task dependency graph.
///
/// TaskGraph uses petgraph's DiGraph to store tasks. Nodes are never
/// removed, so node indices double as insertion order, which is what
/// topological ordering uses to break ties.
pub struct TaskGraph {
    /// The underlying directed graph. An edge `a -> b` means `a` runs first.
    graph: DiGraph<TaskNode, ()>,
    /// Index mapping from task name to NodeIndex for fast lookups.
    task_index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Create a new empty TaskGraph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task to the graph.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateName`] if a task with the same name exists.
    pub fn add_task(&mut self, task: TaskNode) -> Result<NodeIndex> {
        if self.task_index.contains_key(&task.name) {
            return Err(Error::DuplicateName(task.name));
        }

        let name = task.name.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(name, index);
        Ok(index)
    }

    /// Add a dependency: `upstream` must succeed before `downstream` starts.
    ///
    /// Adding an edge that already exists is a no-op.
    ///
    /// # Errors
    /// - [`Error::UnknownNode`] if either task is not in the graph
    /// - [`Error::Cycle`] if `upstream` is reachable from `downstream`
    ///
    /// The graph is unchanged when an error is returned.
    pub fn add_edge(&mut self, upstream: &str, downstream: &str) -> Result<()> {
        let from = self.index_of(upstream)?;
        let to = self.index_of(downstream)?;

        if has_path_connecting(&self.graph, to, from, None) {
            return Err(Error::Cycle {
                from: upstream.to_string(),
                to: downstream.to_string(),
            });
        }

        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    /// Link consecutive tasks: `chain(&["a", "b", "c"])` adds `a -> b` and `b -> c`.
    ///
    /// # Errors
    /// Fails like [`add_edge`](Self::add_edge) on the first bad pair. Edges
    /// added earlier in the same call are removed again, so the graph is
    /// unchanged when an error is returned.
    pub fn chain(&mut self, names: &[&str]) -> Result<&mut Self> {
        let mut added = Vec::new();
        for pair in names.windows(2) {
            let existed = self.has_edge(pair[0], pair[1]);
            if let Err(err) = self.add_edge(pair[0], pair[1]) {
                // Newest first, so each removal takes the last edge index
                // and no surviving edge is renumbered.
                for edge in added.into_iter().rev() {
                    self.graph.remove_edge(edge);
                }
                return Err(err);
            }
            if !existed {
                let from = self.index_of(pair[0])?;
                let to = self.index_of(pair[1])?;
                added.extend(self.graph.find_edge(from, to));
            }
        }
        Ok(self)
    }

    fn index_of(&self, name: &str) -> Result<NodeIndex> {
        self.task_index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    /// Get a reference to a task by its name.
    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.task_index
            .get(name)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Check if the graph contains a task.
    pub fn contains(&self, name: &str) -> bool {
        self.task_index.contains_key(name)
    }

    /// Get the number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get the number of dependencies (edges) in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if a direct dependency exists between two tasks.
    pub fn has_edge(&self, upstream: &str, downstream: &str) -> bool {
        match (self.task_index.get(upstream), self.task_index.get(downstream)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> Vec<&TaskNode> {
        self.graph.node_weights().collect()
    }

    /// Direct upstream tasks, in insertion order.
    pub fn upstream(&self, name: &str) -> Vec<&TaskNode> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct downstream tasks, in insertion order.
    pub fn downstream(&self, name: &str) -> Vec<&TaskNode> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&TaskNode> {
        let Some(&index) = self.task_index.get(name) else {
            return Vec::new();
        };
        let mut indices: Vec<_> = self.graph.neighbors_directed(index, direction).collect();
        indices.sort();
        indices
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }

    /// Every task reachable from `name`, excluding `name` itself.
    pub fn descendants(&self, name: &str) -> Vec<&TaskNode> {
        let Some(&start) = self.task_index.get(name) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut reached = Vec::new();
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                reached.push(index);
            }
        }
        reached.sort();
        reached
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }

    /// Tasks not yet in `done` whose direct upstreams are all in `done`.
    ///
    /// Returned in insertion order.
    pub fn ready(&self, done: &HashSet<String>) -> Vec<&TaskNode> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;
                if done.contains(&task.name) {
                    return None;
                }
                let satisfied = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .all(|dep| done.contains(&self.graph[dep].name));
                satisfied.then_some(task)
            })
            .collect()
    }

    /// Get tasks in topological order.
    ///
    /// Kahn's algorithm over a min-heap of insertion indices: among the tasks
    /// whose dependencies are all placed, the earliest added goes next. The
    /// result is the same on every call.
    ///
    /// # Errors
    /// Returns [`Error::Cycle`] if the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<&TaskNode>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect();

        let mut heap: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|i| in_degree[i.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = heap.pop() {
            order.push(index);
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    heap.push(Reverse(next));
                }
            }
        }

        if order.len() < self.graph.node_count() {
            return Err(self.cycle_error(&in_degree));
        }

        Ok(order.into_iter().map(|i| &self.graph[i]).collect())
    }

    /// Build a cycle error from the nodes Kahn's algorithm could not place.
    fn cycle_error(&self, in_degree: &[usize]) -> Error {
        let stuck = self
            .graph
            .node_indices()
            .find(|i| in_degree[i.index()] > 0);
        let pair = stuck.and_then(|to| {
            self.graph
                .neighbors_directed(to, Direction::Incoming)
                .find(|from| in_degree[from.index()] > 0)
                .map(|from| (from, to))
        });
        match pair {
            Some((from, to)) => Error::Cycle {
                from: self.graph[from].name.clone(),
                to: self.graph[to].name.clone(),
            },
            None => Error::Validation("graph contains a cycle".to_string()),
        }
    }

    /// Check the graph before a run.
    ///
    /// # Errors
    /// - [`Error::Cycle`] if the graph is not acyclic
    /// - [`Error::UnknownNode`] if a task references a missing task
    /// - [`Error::Validation`] if a reference does not point at a transitive
    ///   upstream, or a non-Create task has a generated id
    pub fn validate(&self) -> Result<()> {
        self.topological_order()?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            match &task.resource_id {
                ResourceId::Generated if task.kind != OperationKind::Create => {
                    return Err(Error::Validation(format!(
                        "task {} needs a resource id for {}",
                        task.name, task.kind
                    )));
                }
                ResourceId::Reference(upstream) => {
                    let source = self.index_of(upstream)?;
                    if source == index || !has_path_connecting(&self.graph, source, index, None) {
                        return Err(Error::Validation(format!(
                            "task {} reads the output of {}, which is not upstream of it",
                            task.name, upstream
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Get the underlying graph for advanced operations.
    pub fn graph(&self) -> &DiGraph<TaskNode, ()> {
        &self.graph
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.edge_count())
            .finish()
    }
}

/// Fluent, all-or-nothing graph construction.
///
/// Nothing is checked until [`build`](Self::build), which either returns a
/// validated graph or the first construction error.
///
/// ```ignore
/// let graph = GraphBuilder::new()
///     .task(TaskNode::create("ps_create", "product_sets"))
///     .task(TaskNode::get("ps_get", "product_sets", ResourceId::Reference("ps_create".into())))
///     .chain(&["ps_create", "ps_get"])
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    tasks: Vec<TaskNode>,
    edges: Vec<(String, String)>,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for the graph.
    pub fn task(mut self, task: TaskNode) -> Self {
        self.tasks.push(task);
        self
    }

    /// Queue a dependency: `upstream` must succeed before `downstream` starts.
    pub fn edge(mut self, upstream: &str, downstream: &str) -> Self {
        self.edges.push((upstream.to_string(), downstream.to_string()));
        self
    }

    /// Queue edges between consecutive names.
    pub fn chain(mut self, names: &[&str]) -> Self {
        for pair in names.windows(2) {
            self.edges.push((pair[0].to_string(), pair[1].to_string()));
        }
        self
    }

    /// Add every task, then every edge, then validate.
    ///
    /// # Errors
    /// The first [`TaskGraph::add_task`], [`TaskGraph::add_edge`] or
    /// [`TaskGraph::validate`] error. No graph is returned in that case.
    pub fn build(self) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        for task in self.tasks {
            graph.add_task(task)?;
        }
        for (upstream, downstream) in &self.edges {
            graph.add_edge(upstream, downstream)?;
        }
        graph.validate()?;
        Ok(graph)
    }
}
