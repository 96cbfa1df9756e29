//! Price graph storage
//!
//! A directed graph over token addresses with dense vertex ids. Vertex 0 is
//! always the reference token (WETH); other vertices are assigned on first
//! use and never reused, so snapshots taken at different times agree on ids.
//!
//! Between any ordered pair of vertices at most one edge is stored. The
//! upsert policy keeps each direction on the best known venue:
//! - no edge yet: insert
//! - same venue: overwrite (the venue re-priced)
//! - different venue: replace only when the new weight is strictly smaller
//!
//! Weights of exactly zero or infinity mean an unset or degenerate price and
//! are rejected at the door.

use crate::model::Amm;
use alloy_primitives::Address;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// Edge payload: the `-ln(rate)` weight and the venue that owns it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceEdge {
    pub weight: f64,
    pub amm: Amm,
}

/// One bucket's view of the market
#[derive(Debug, Clone)]
pub struct PriceGraph {
    graph: DiGraph<Address, PriceEdge>,
    index: HashMap<Address, NodeIndex>,
}

impl PriceGraph {
    /// Create a graph with the reference token pinned at vertex 0
    pub fn new(reference: Address) -> PriceGraph {
        let mut graph = DiGraph::new();
        let zero = graph.add_node(reference);
        PriceGraph {
            graph,
            index: HashMap::from([(reference, zero)]),
        }
    }

    /// Vertex id for a token, assigning the next dense id on first use
    pub fn ensure_vertex(&mut self, token: Address) -> NodeIndex {
        if let Some(&v) = self.index.get(&token) {
            return v;
        }
        let v = self.graph.add_node(token);
        self.index.insert(token, v);
        v
    }

    pub fn vertex(&self, token: Address) -> Option<NodeIndex> {
        self.index.get(&token).copied()
    }

    pub fn address(&self, vertex: NodeIndex) -> Address {
        self.graph[vertex]
    }

    /// Apply an edge update under the per-pair policy. Degenerate weights
    /// (zero, infinite, NaN) are dropped.
    pub fn upsert_edge(&mut self, from: NodeIndex, to: NodeIndex, amm: Amm, weight: f64) {
        if weight == 0.0 || !weight.is_finite() {
            return;
        }

        match self.graph.find_edge(from, to) {
            Some(e) => {
                let edge = &mut self.graph[e];
                if edge.amm == amm || weight < edge.weight {
                    *edge = PriceEdge { weight, amm };
                }
            }
            None => {
                self.graph.add_edge(from, to, PriceEdge { weight, amm });
            }
        }
    }

    /// Deep copy for scan tasks; the live graph stays writable meanwhile
    pub fn snapshot(&self) -> PriceGraph {
        self.clone()
    }

    pub fn inner(&self) -> &DiGraph<Address, PriceEdge> {
        &self.graph
    }

    /// Bypass the upsert filter; only for forging invalid states in tests
    #[cfg(test)]
    pub fn force_weight(&mut self, from: NodeIndex, to: NodeIndex, weight: f64) {
        let e = self
            .graph
            .find_edge(from, to)
            .expect("edge must exist to force its weight");
        self.graph[e].weight = weight;
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Single-hop best-cost table: `d[i][i] = 0`, `d[i][j]` the lightest edge
    /// `i -> j` or infinity. Not transitive-closed; it re-prices known cycles
    /// cheaply, it does not find paths.
    pub fn distance_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.graph.node_count();
        let mut d = vec![vec![f64::INFINITY; n]; n];
        for (i, row) in d.iter_mut().enumerate() {
            row[i] = 0.0;
        }

        for edge in self.graph.edge_references() {
            let (i, j) = (edge.source().index(), edge.target().index());
            // `<` picks the min of parallel arcs (and nicely ignores NaN)
            if edge.weight().weight < d[i][j] {
                d[i][j] = edge.weight().weight;
            }
        }

        d
    }
}
