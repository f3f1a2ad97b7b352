// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Pipeline dependency graph
//!
//! The stage chain is declared as an explicit graph with named nodes and
//! "must succeed before" edges rather than imperative call order, so a
//! future parallel branch is a new edge, not a redesign. Cycles and unknown
//! dependencies are rejected at build time.

use petgraph::algo::{has_path_connecting, kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use super::StageName;
use crate::errors::{TeleflowError, TeleflowResult};

/// Dependency graph over pipeline stages
pub struct PipelineGraph {
    graph: DiGraph<StageName, ()>,
    indices: HashMap<StageName, NodeIndex>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
        }
    }

    /// The fixed daily chain:
    /// scrape → load_raw → transform → detect → load_detections →
    /// selective_refresh
    pub fn standard() -> Self {
        let mut graph = Self::new();
        for stage in StageName::ALL {
            graph.add_stage(stage);
        }

        let chain = StageName::ALL;
        for pair in chain.windows(2) {
            graph
                .add_edge(pair[0], pair[1])
                .expect("fixed chain references known stages");
        }

        graph.validate().expect("fixed chain is acyclic");
        graph
    }

    pub fn add_stage(&mut self, stage: StageName) {
        if !self.indices.contains_key(&stage) {
            let idx = self.graph.add_node(stage);
            self.indices.insert(stage, idx);
        }
    }

    /// Add a "`from` must succeed before `to`" edge
    pub fn add_edge(&mut self, from: StageName, to: StageName) -> TeleflowResult<()> {
        let from_idx = self.index_of(to, from)?;
        let to_idx = self.index_of(from, to)?;

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    fn index_of(&self, stage: StageName, wanted: StageName) -> TeleflowResult<NodeIndex> {
        self.indices
            .get(&wanted)
            .copied()
            .ok_or_else(|| TeleflowError::UnknownDependency {
                stage: stage.to_string(),
                dependency: wanted.to_string(),
            })
    }

    /// Reject cycles
    pub fn validate(&self) -> TeleflowResult<()> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(_) => Err(TeleflowError::CircularDependency {
                stages: self.cycle_members(),
            }),
        }
    }

    /// Stages inside a strongly connected component of more than one node
    fn cycle_members(&self) -> Vec<String> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .map(|idx| self.graph[idx].to_string())
            .collect()
    }

    /// Execution order
    pub fn topological_order(&self) -> TeleflowResult<Vec<StageName>> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|idx| self.graph[idx]).collect())
            .map_err(|_| TeleflowError::CircularDependency {
                stages: self.cycle_members(),
            })
    }

    /// Direct predecessors of a stage
    pub fn dependencies(&self, stage: StageName) -> Vec<StageName> {
        let Some(&idx) = self.indices.get(&stage) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|n| self.graph[n])
            .collect()
    }

    /// Every stage that transitively requires `stage`, in execution order.
    ///
    /// These are the nodes that must be skipped when `stage` fails.
    pub fn downstream_of(&self, stage: StageName) -> Vec<StageName> {
        let Some(&idx) = self.indices.get(&stage) else {
            return Vec::new();
        };

        let order = match self.topological_order() {
            Ok(order) => order,
            Err(_) => return Vec::new(),
        };

        order
            .into_iter()
            .filter(|&other| {
                other != stage
                    && has_path_connecting(&self.graph, idx, self.indices[&other], None)
            })
            .collect()
    }

    /// Text rendering of the execution plan
    pub fn to_text(&self) -> TeleflowResult<String> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for (i, stage) in order.iter().enumerate() {
            let deps = self.dependencies(*stage);
            out.push_str(&format!("{}. {}", i + 1, stage));

            if !deps.is_empty() {
                let names: Vec<String> = deps.iter().map(ToString::to_string).collect();
                out.push_str(&format!(" [after: {}]", names.join(", ")));
            }
            out.push('\n');
        }

        Ok(out)
    }

    /// DOT rendering
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_indices() {
            let (from, to) = self.graph.edge_endpoints(edge).expect("edge exists");
            out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                self.graph[from], self.graph[to]
            ));
        }

        out.push_str("}\n");
        out
    }

    /// Mermaid rendering
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for edge in self.graph.edge_indices() {
            let (from, to) = self.graph.edge_endpoints(edge).expect("edge exists");
            out.push_str(&format!(
                "    {} --> {}\n",
                self.graph[from], self.graph[to]
            ));
        }

        out
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}
