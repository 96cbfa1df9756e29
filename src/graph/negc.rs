//! Bounded negative-cycle enumeration
//!
//! The hot-path enumerator. It only looks for cycles of length 2 and 3
//! anchored at the reference vertex: out one hop (or two), straight back.
//! That bound is what keeps a scan inside the per-block latency budget; the
//! general search lives in `bellman_ford` and is never run per tick.
//!
//! A round trip through the same venue is not an arbitrage against itself,
//! so 2-cycles whose halves share an AMM are suppressed here.

use crate::graph::{PriceEdge, PriceGraph};
use crate::model::Half;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

/// An invalid weight reached the graph: the upstream adapter is emitting
/// degenerate rates and enumeration cannot be trusted.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("infinite weight on edge {from} -> {to}")]
    InfiniteWeight { from: usize, to: usize },
    #[error("zero weight on edge {from} -> {to}")]
    ZeroWeight { from: usize, to: usize },
}

/// Enumerate negative 2- and 3-cycles through the reference vertex.
///
/// `emit` receives each cycle as legs ending back at vertex 0 and returns
/// whether to keep enumerating. The caller decides what a cycle is worth;
/// this function only guarantees the weights sum below zero.
pub fn negative_cycles<F>(
    graph: &PriceGraph,
    deadline: Instant,
    mut emit: F,
) -> Result<(), GraphError>
where
    F: FnMut(&[Half]) -> bool,
{
    let g = graph.inner();
    let zero = NodeIndex::new(0);
    if g.node_count() == 0 {
        return Ok(());
    }

    // Lightest edge per directed pair, validating every weight on the way
    let mut best: HashMap<(NodeIndex, NodeIndex), PriceEdge> = HashMap::new();
    for edge in g.edge_references() {
        let w = edge.weight().weight;
        if w.is_infinite() {
            return Err(GraphError::InfiniteWeight {
                from: edge.source().index(),
                to: edge.target().index(),
            });
        }
        if w == 0.0 {
            return Err(GraphError::ZeroWeight {
                from: edge.source().index(),
                to: edge.target().index(),
            });
        }

        let slot = best
            .entry((edge.source(), edge.target()))
            .or_insert(*edge.weight());
        if w < slot.weight {
            *slot = *edge.weight();
        }
    }

    for y_edge in g.edges(zero) {
        if Instant::now() >= deadline {
            return Ok(());
        }

        let a = y_edge.target();
        let y = Half {
            to: a,
            weight: y_edge.weight().weight,
            amm: y_edge.weight().amm,
        };

        if let Some(h) = best.get(&(a, zero)) {
            if y.weight + h.weight < 0.0 && y.amm != h.amm {
                let back = Half {
                    to: zero,
                    weight: h.weight,
                    amm: h.amm,
                };
                if !emit(&[y, back]) {
                    return Ok(());
                }
            }
        }

        for z_edge in g.edges(a) {
            let b = z_edge.target();
            let z = Half {
                to: b,
                weight: z_edge.weight().weight,
                amm: z_edge.weight().amm,
            };

            if let Some(h) = best.get(&(b, zero)) {
                if y.weight + z.weight + h.weight < 0.0 {
                    let back = Half {
                        to: zero,
                        weight: h.weight,
                        amm: h.amm,
                    };
                    if !emit(&[y, z, back]) {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}
