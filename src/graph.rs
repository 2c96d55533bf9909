//! Dependency graph for recipe build ordering
//!
//! Vertices are recipe names; an edge `key -> dep` means `key` requires `dep`.
//! `topological_sort` consumes the graph: each pass emits every vertex with no
//! unresolved dependency and deletes it, so the graph is empty afterwards and
//! cannot be reused. A pass that emits nothing while vertices remain proves a
//! cycle.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// A dependency graph, built fresh for each orchestration run
#[derive(Debug, Default, Clone)]
pub struct DepGraph {
    /// Map from recipe name to the names it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex with no dependencies (no-op if present)
    pub fn add_vertex(&mut self, name: impl Into<String>) {
        self.edges.entry(name.into()).or_default();
    }

    /// Record that `key` requires `depends_on`.
    ///
    /// `key` is added as a vertex if missing. `depends_on` is not: a dependency
    /// that never becomes a vertex counts as already satisfied.
    pub fn add_edge(&mut self, key: impl Into<String>, depends_on: impl Into<String>) {
        self.edges
            .entry(key.into())
            .or_default()
            .insert(depends_on.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Direct dependencies of a vertex
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Order vertices so each appears after everything it depends on.
    ///
    /// Consumes the graph. Vertices that become ready in the same pass are
    /// emitted in name order. Fails with `CycleDetected` naming the vertices
    /// that could not be resolved.
    pub fn topological_sort(mut self) -> Result<Vec<String>> {
        let vertices: BTreeSet<String> = self.edges.keys().cloned().collect();
        for deps in self.edges.values_mut() {
            deps.retain(|d| vertices.contains(d));
        }

        let mut order = Vec::with_capacity(self.edges.len());
        while !self.edges.is_empty() {
            let ready: Vec<String> = self
                .edges
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| name.clone())
                .collect();

            if ready.is_empty() {
                return Err(Error::CycleDetected {
                    remaining: self.edges.into_keys().collect(),
                });
            }

            for name in &ready {
                self.edges.remove(name);
            }
            for deps in self.edges.values_mut() {
                for name in &ready {
                    deps.remove(name);
                }
            }
            order.extend(ready);
        }

        Ok(order)
    }
}
