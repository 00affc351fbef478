//! Dependency graph for stacks
//!
//! Answers "who depends on this stack" questions. Uses petgraph for graph
//! operations; build ordering and cycle detection live in `layers`.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use super::stack::Stack;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Stack not found: {0}")]
    StackNotFound(String),
}

/// A dependency graph for stacks
#[derive(Debug, Default)]
pub struct StackGraph {
    /// Edges point from a dependency to its dependent
    graph: DiGraph<String, ()>,

    /// Map from stack key to node index
    node_map: HashMap<String, NodeIndex>,
}

impl StackGraph {
    /// Builds the graph from configured stacks
    ///
    /// Both `build_first`/variable dependencies and `build_after` relations
    /// become edges. Unknown references are rejected.
    pub fn from_stacks(stacks: &BTreeMap<String, Stack>) -> Result<Self, GraphError> {
        let mut graph = Self::default();

        for key in stacks.keys() {
            let idx = graph.graph.add_node(key.clone());
            graph.node_map.insert(key.clone(), idx);
        }

        for (key, stack) in stacks {
            for dep in stack.dependencies() {
                graph.add_dependency(key, &dep)?;
            }
            for after in &stack.build_after {
                graph.add_dependency(after, key)?;
            }
        }

        Ok(graph)
    }

    /// Adds an edge: `stack` depends on `depends_on`
    fn add_dependency(&mut self, stack: &str, depends_on: &str) -> Result<(), GraphError> {
        let stack_idx = self.index(stack)?;
        let dep_idx = self.index(depends_on)?;

        if self.graph.find_edge(dep_idx, stack_idx).is_none() {
            self.graph.add_edge(dep_idx, stack_idx, ());
        }
        Ok(())
    }

    fn index(&self, key: &str) -> Result<NodeIndex, GraphError> {
        self.node_map
            .get(key)
            .copied()
            .ok_or_else(|| GraphError::StackNotFound(key.to_string()))
    }

    /// Every stack that depends on `key`, directly or not, sorted
    pub fn transitive_dependents(&self, key: &str) -> Result<Vec<String>, GraphError> {
        let start = self.index(key)?;
        let mut found = BTreeSet::new();

        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                if let Some(name) = self.graph.node_weight(idx) {
                    found.insert(name.clone());
                }
            }
        }

        Ok(found.into_iter().collect())
    }
}
