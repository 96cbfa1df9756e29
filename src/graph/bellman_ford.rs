//! General negative-cycle search
//!
//! Full Bellman-Ford with predecessor decoding. Unlike the bounded
//! enumerator this finds cycles of any length and any anchor, but a full
//! relaxation pass over every edge per vertex cannot meet the per-block
//! latency budget, so it only runs when deep scanning is switched on.

use crate::graph::{PriceEdge, PriceGraph};
use crate::model::Half;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

/// Find one negative cycle reachable from `start`, decoded as legs in
/// traversal order. Returns `None` when no reachable negative cycle exists.
pub fn find_negative_cycle(graph: &PriceGraph, start: NodeIndex) -> Option<Vec<Half>> {
    let g = graph.inner();
    let n = g.node_count();
    if n == 0 || start.index() >= n {
        return None;
    }

    let mut dist = vec![f64::INFINITY; n];
    let mut pred: Vec<Option<(NodeIndex, PriceEdge)>> = vec![None; n];
    dist[start.index()] = 0.0;

    for _ in 1..n {
        let mut improved = false;
        for e in g.edge_references() {
            let (u, v) = (e.source().index(), e.target().index());
            let d = dist[u] + e.weight().weight;
            if dist[u].is_finite() && d < dist[v] {
                dist[v] = d;
                pred[v] = Some((e.source(), *e.weight()));
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }

    // An edge that still relaxes after n-1 rounds sits on (or hangs off) a
    // negative cycle
    let mut seed = None;
    for e in g.edge_references() {
        let (u, v) = (e.source().index(), e.target().index());
        if dist[u].is_finite() && dist[u] + e.weight().weight < dist[v] {
            seed = Some(e.source());
            break;
        }
    }

    // Walk n predecessors to guarantee we are inside the cycle, not on the
    // tail leading to it
    let mut v = seed?;
    for _ in 0..n {
        v = pred[v.index()]?.0;
    }

    let stop = v;
    let mut cur = v;
    let mut legs = Vec::new();
    loop {
        let (p, edge) = pred[cur.index()]?;
        legs.push(Half {
            to: cur,
            weight: edge.weight,
            amm: edge.amm,
        });
        cur = p;
        if cur == stop {
            break;
        }
    }
    legs.reverse();
    Some(legs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Amm;
    use alloy_primitives::{address, Address};

    const W: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    const A: Address = address!("00000000000000000000000000000000000000aa");
    const B: Address = address!("00000000000000000000000000000000000000bb");
    const C: Address = address!("00000000000000000000000000000000000000cc");

    fn w(rate: f64) -> f64 {
        -rate.ln()
    }

    #[test]
    fn test_finds_profitable_triangle() {
        let mut g = PriceGraph::new(W);
        let a = g.ensure_vertex(A);
        let b = g.ensure_vertex(B);
        let zero = NodeIndex::new(0);

        g.upsert_edge(zero, a, Amm::UniswapV2, w(2.0));
        g.upsert_edge(a, b, Amm::UniswapV2, w(1.5));
        g.upsert_edge(b, zero, Amm::Sushiswap, w(0.34));

        let legs = find_negative_cycle(&g, zero).expect("cycle");
        assert_eq!(legs.len(), 3);

        let total: f64 = legs.iter().map(|h| h.weight).sum();
        assert!(total < 0.0);

        // the legs chain: each lands where the next departs
        let lands: Vec<_> = legs.iter().map(|h| h.to).collect();
        assert!(lands.contains(&zero));
        assert!(lands.contains(&a));
        assert!(lands.contains(&b));
    }

    #[test]
    fn test_finds_cycles_longer_than_the_bounded_enumerator() {
        // four hops: W->A->B->C->W with product 1.04
        let mut g = PriceGraph::new(W);
        let a = g.ensure_vertex(A);
        let b = g.ensure_vertex(B);
        let c = g.ensure_vertex(C);
        let zero = NodeIndex::new(0);

        g.upsert_edge(zero, a, Amm::UniswapV2, w(2.0));
        g.upsert_edge(a, b, Amm::Sushiswap, w(1.3));
        g.upsert_edge(b, c, Amm::UniswapV2, w(0.8));
        g.upsert_edge(c, zero, Amm::Sushiswap, w(0.5));

        let legs = find_negative_cycle(&g, zero).expect("cycle");
        assert_eq!(legs.len(), 4);
        let total: f64 = legs.iter().map(|h| h.weight).sum();
        assert!(((-total).exp() - 1.04).abs() < 1e-9);
    }

    #[test]
    fn test_no_cycle_in_fair_market() {
        let mut g = PriceGraph::new(W);
        let a = g.ensure_vertex(A);
        let zero = NodeIndex::new(0);

        // perfectly inverse rates with a spread: round trip loses
        g.upsert_edge(zero, a, Amm::UniswapV2, w(2.0));
        g.upsert_edge(a, zero, Amm::Sushiswap, w(0.49));

        assert!(find_negative_cycle(&g, zero).is_none());
    }
}
