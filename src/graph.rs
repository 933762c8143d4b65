// Topoplan: compiling microservice test topologies into network plans
// Copyright (C) 2023 The Topoplan Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Directed graph of the topology, used to reject cyclic topologies.

use std::collections::HashMap;

use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};

use crate::config::{EntityType, TopologyConfig};

/// Directed graph with one node per entity. Every connection adds an edge from its owner to the
/// first hop and one edge for every consecutive pair of hops. Connections of switches add no
/// edges, since switches only bridge.
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl TopologyGraph {
    /// Build the graph of a topology.
    pub fn build(config: &TopologyConfig) -> Self {
        let mut g = Self::default();
        for entity in &config.entities {
            g.node(&entity.name);
        }
        for entity in &config.entities {
            if entity.entity_type() == EntityType::Switch {
                continue;
            }
            for conn in entity.connections() {
                let hops = conn.path.from_source(&entity.name);
                for (a, b) in hops.iter().zip(hops.iter().skip(1)) {
                    let a = g.node(a);
                    let b = g.node(b);
                    g.graph.update_edge(a, b, ());
                }
            }
        }
        g
    }

    /// Get (or create) the node of `name`.
    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.nodes.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    /// Returns some entity on a cycle, or `None` if the graph is acyclic.
    pub fn find_cycle(&self) -> Option<&str> {
        toposort(&self.graph, None)
            .err()
            .map(|cycle| self.graph[cycle.node_id()].as_str())
    }

    /// Returns `true` if the graph contains the edge from `a` to `b`.
    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        match (self.nodes.get(a), self.nodes.get(b)) {
            (Some(a), Some(b)) => self.graph.contains_edge(*a, *b),
            _ => false,
        }
    }

    /// Number of entities
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The underlying graph
    pub fn inner(&self) -> &DiGraph<String, ()> {
        &self.graph
    }
}
