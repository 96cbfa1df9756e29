//! The price graph
//!
//! Each notional bucket owns one of these: a directed graph whose vertices
//! are token contracts and whose edges carry `-ln(rate)` weights. A cycle
//! whose weights sum below zero multiplies back to more than it started with.
//!
//! Submodules:
//! - `price_graph`: adjacency + edge upsert policy + distance matrix
//! - `negc`: bounded 2/3-cycle enumeration anchored at the reference token
//! - `bellman_ford`: general negative-cycle search, off the hot path

mod bellman_ford;
mod negc;
mod price_graph;

pub use bellman_ford::find_negative_cycle;
pub use negc::{negative_cycles, GraphError};
pub use price_graph::{PriceEdge, PriceGraph};
