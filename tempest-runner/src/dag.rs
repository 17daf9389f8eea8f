//! Task graph: named nodes, explicit upstream edges, typed input bindings.
//!
//! A [`TaskNode`] declares which tasks it runs after, which upstream outputs
//! it consumes (bound to local parameter names), and which outputs it
//! promises. [`DagBuilder::build`] validates the graph (unknown names,
//! undeclared outputs, cycles) and fixes a deterministic topological order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tempest_core::{Artifact, TaskError};
use thiserror::Error;

/// Outputs of one task, keyed by output name.
pub type TaskOutputs = BTreeMap<String, Artifact>;

/// The work a node performs.
pub type TransformFn = Arc<dyn Fn(&TaskInputs) -> Result<TaskOutputs, TaskError> + Send + Sync>;

/// Reference to a named output of another task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub task: String,
    pub output: String,
}

/// Artifacts bound to a task's parameters for one execution.
#[derive(Debug, Clone)]
pub struct TaskInputs {
    task: String,
    values: BTreeMap<String, Artifact>,
}

impl TaskInputs {
    pub fn new(task: impl Into<String>, values: BTreeMap<String, Artifact>) -> Self {
        Self {
            task: task.into(),
            values,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn get(&self, param: &str) -> Result<&Artifact, TaskError> {
        self.values.get(param).ok_or_else(|| TaskError::MissingInput {
            task: self.task.clone(),
            param: param.to_string(),
        })
    }

    pub fn path(&self, param: &str) -> Result<&Path, TaskError> {
        self.get(param).map(Artifact::path)
    }
}

/// A named unit of work.
#[derive(Clone)]
pub struct TaskNode {
    id: String,
    upstream: Vec<String>,
    inputs: BTreeMap<String, OutputRef>,
    outputs: Vec<String>,
    run: TransformFn,
}

impl TaskNode {
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(&TaskInputs) -> Result<TaskOutputs, TaskError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            upstream: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            run: Arc::new(run),
        }
    }

    /// Order this node after `task` without consuming any of its outputs.
    pub fn after(mut self, task: impl Into<String>) -> Self {
        let task = task.into();
        if !self.upstream.contains(&task) {
            self.upstream.push(task);
        }
        self
    }

    /// Bind `param` to `task`'s `output`. Implies [`TaskNode::after`].
    pub fn input(
        self,
        param: impl Into<String>,
        task: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        let task = task.into();
        let mut node = self.after(task.clone());
        node.inputs.insert(
            param.into(),
            OutputRef {
                task,
                output: output.into(),
            },
        );
        node
    }

    /// Declare an output this node must produce.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.outputs.contains(&name) {
            self.outputs.push(name);
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn upstream(&self) -> &[String] {
        &self.upstream
    }

    pub fn inputs(&self) -> &BTreeMap<String, OutputRef> {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn run(&self, inputs: &TaskInputs) -> Result<TaskOutputs, TaskError> {
        (self.run)(inputs)
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("upstream", &self.upstream)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Namespacing helper: `TaskGroup::new("clean").id("daily_stock")` is `clean.daily_stock`.
///
/// Groups carry no semantics beyond the names they produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup {
    name: String,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn id(&self, task: &str) -> String {
        format!("{}.{task}", self.name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("task '{0}' is declared twice")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{task}' consumes '{output}' which '{upstream}' does not declare")]
    UnknownOutput {
        task: String,
        upstream: String,
        output: String,
    },

    #[error("task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle among tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Collects nodes in declaration order.
#[derive(Debug, Default)]
pub struct DagBuilder {
    nodes: Vec<TaskNode>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: TaskNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Validate and topologically order the graph.
    ///
    /// Ties are broken by declaration order, so the same declarations always
    /// yield the same order.
    pub fn build(self) -> Result<Dag, DagError> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(DagError::DuplicateTask(node.id.clone()));
            }
        }

        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut in_degree = vec![0usize; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.upstream {
                if dep == &node.id {
                    return Err(DagError::SelfDependency(node.id.clone()));
                }
                let &d = index.get(dep).ok_or_else(|| DagError::UnknownDependency {
                    task: node.id.clone(),
                    dependency: dep.clone(),
                })?;
                downstream[d].push(i);
                in_degree[i] += 1;
            }
            for binding in node.inputs.values() {
                let upstream = &self.nodes[index[&binding.task]];
                if !upstream.outputs.contains(&binding.output) {
                    return Err(DagError::UnknownOutput {
                        task: node.id.clone(),
                        upstream: binding.task.clone(),
                        output: binding.output.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm.
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &downstream[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, n)| n.id.clone())
                .collect();
            return Err(DagError::Cycle(stuck));
        }

        let mut slots: Vec<Option<TaskNode>> = self.nodes.into_iter().map(Some).collect();
        let nodes: Vec<TaskNode> = order.iter().filter_map(|&i| slots[i].take()).collect();
        Ok(Dag::from_ordered(nodes))
    }
}

/// A validated graph, nodes stored in topological order.
#[derive(Debug)]
pub struct Dag {
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
}

impl Dag {
    fn from_ordered(nodes: Vec<TaskNode>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let mut upstream = vec![Vec::new(); nodes.len()];
        let mut downstream = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.upstream {
                if let Some(&d) = index.get(dep) {
                    upstream[i].push(d);
                    downstream[d].push(i);
                }
            }
        }
        Self {
            nodes,
            index,
            upstream,
            downstream,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn upstream_of(&self, i: usize) -> &[usize] {
        &self.upstream[i]
    }

    /// Every task transitively downstream of `id` (excluding `id` itself).
    pub fn downstream_closure(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let Some(start) = self.position(id) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &next in &self.downstream[i] {
                if seen.insert(self.nodes[next].id.clone()) {
                    stack.push(next);
                }
            }
        }
        seen
    }
}
