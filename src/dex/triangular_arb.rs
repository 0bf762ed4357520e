// Triangular Arbitrage Cycle Finder
//
// Enumerates directed 3-edge cycles over a flat edge list and keeps the ones whose
// chained quotes, taken at a small seed size, return more than the seed.
//
// Algorithm:
// - Edges live in one Vec; adjacency is a map from mint to edge indices
// - Nested a -> b -> c walk over the adjacency, no edge index used twice
// - Triples are quoted concurrently (order preserved), hops within a triple in sequence
// - A hop that errors counts as a rejection for that triple only

use futures::stream::{self, StreamExt};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use tracing::{debug, info};

use super::edge::{describe, Edge, EdgeRef};

/// Examples logged per drop reason per scan
const MAX_DROP_EXAMPLES: usize = 5;

/// An ordered triple of edges closing back on the first edge's input mint
#[derive(Clone)]
pub struct Cycle {
    pub indices: [usize; 3],
    pub legs: [EdgeRef; 3],
}

impl Cycle {
    pub fn start_mint(&self) -> Pubkey {
        self.legs[0].from_mint()
    }

    pub fn hops(&self) -> usize {
        self.legs.len()
    }

    /// `id1 -> id2 -> id3`
    pub fn id(&self) -> String {
        self.legs
            .iter()
            .map(|leg| leg.id().to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl std::fmt::Debug for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cycle")
            .field("indices", &self.indices)
            .field("path", &self.id())
            .finish()
    }
}

/// Why a chained quote did not produce a usable amount
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Hop returned zero (unroutable); `hop` is 1-based
    ZeroQuote { hop: usize },
    /// Hop returned an error; `hop` is 1-based
    QuoteError { hop: usize },
    NotProfitable,
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::ZeroQuote { hop: 1 } => "no_q1",
            DropReason::ZeroQuote { hop: 2 } => "no_q2",
            DropReason::ZeroQuote { .. } => "no_q3",
            DropReason::QuoteError { .. } => "quote_error",
            DropReason::NotProfitable => "not_profitable",
        }
    }
}

/// Quote `amount_in` through every leg in order, feeding each output into the next hop.
/// Returns the output of every hop.
pub async fn quote_chain(legs: &[EdgeRef], amount_in: u64) -> Result<Vec<u64>, DropReason> {
    let mut outputs = Vec::with_capacity(legs.len());
    let mut amount = amount_in;
    for (i, leg) in legs.iter().enumerate() {
        let hop = i + 1;
        amount = match leg.quote(amount).await {
            Ok(0) => return Err(DropReason::ZeroQuote { hop }),
            Ok(out) => out,
            Err(e) => {
                debug!("quote error on {} hop {}: {:#}", describe(leg.as_ref()), hop, e);
                return Err(DropReason::QuoteError { hop });
            }
        };
        outputs.push(amount);
    }
    Ok(outputs)
}

/// Per-scan rejection counters
#[derive(Debug, Default, Clone)]
pub struct DropStats {
    pub counts: HashMap<&'static str, usize>,
    pub candidates: usize,
    pub profitable: usize,
}

impl DropStats {
    fn record(&mut self, reason: DropReason, path: &str, seed: u64) {
        let count = self.counts.entry(reason.label()).or_insert(0);
        *count += 1;
        if *count <= MAX_DROP_EXAMPLES {
            debug!("drop[{}] {} seed={}", reason.label(), path, seed);
        }
    }

    pub fn get(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }
}

/// Group edge indices by input mint
pub fn adjacency(edges: &[EdgeRef]) -> HashMap<Pubkey, Vec<usize>> {
    let mut by_from: HashMap<Pubkey, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        by_from.entry(edge.from_mint()).or_default().push(idx);
    }
    by_from
}

/// All index triples `(a, b, c)` forming a closed 3-cycle with distinct edges
pub fn enumerate_triples(edges: &[EdgeRef]) -> Vec<[usize; 3]> {
    let by_from = adjacency(edges);
    let mut triples = Vec::new();

    for (a, edge_a) in edges.iter().enumerate() {
        let Some(bs) = by_from.get(&edge_a.to_mint()) else {
            continue;
        };
        for &b in bs {
            if b == a {
                continue;
            }
            let Some(cs) = by_from.get(&edges[b].to_mint()) else {
                continue;
            };
            for &c in cs {
                if c == a || c == b {
                    continue;
                }
                if edges[c].to_mint() == edge_a.from_mint() {
                    triples.push([a, b, c]);
                }
            }
        }
    }
    triples
}

/// Cycle finder with bounded quote concurrency
#[derive(Debug, Clone)]
pub struct CycleFinder {
    concurrency: usize,
}

impl Default for CycleFinder {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl CycleFinder {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Return every triple whose chained quote at `seed_for(first leg)` ends above the seed.
    pub async fn find_cycles<F>(&self, edges: &[EdgeRef], seed_for: F) -> Vec<Cycle>
    where
        F: Fn(&dyn Edge) -> u64,
    {
        self.find_cycles_with_stats(edges, seed_for).await.0
    }

    pub async fn find_cycles_with_stats<F>(
        &self,
        edges: &[EdgeRef],
        seed_for: F,
    ) -> (Vec<Cycle>, DropStats)
    where
        F: Fn(&dyn Edge) -> u64,
    {
        let triples = enumerate_triples(edges);
        let mut stats = DropStats {
            candidates: triples.len(),
            ..Default::default()
        };

        let quoted: Vec<_> = stream::iter(triples.into_iter().map(|indices| {
            let legs = indices.map(|i| edges[i].clone());
            let seed = seed_for(legs[0].as_ref());
            async move {
                let result = quote_chain(&legs, seed).await;
                (Cycle { indices, legs }, seed, result)
            }
        }))
        .buffered(self.concurrency)
        .collect()
        .await;

        let mut cycles = Vec::new();
        for (cycle, seed, result) in quoted {
            let verdict = match result {
                Ok(outputs) if outputs.last().copied().unwrap_or(0) > seed => Ok(outputs),
                Ok(_) => Err(DropReason::NotProfitable),
                Err(reason) => Err(reason),
            };
            match verdict {
                Ok(outputs) => {
                    debug!(
                        "✓ cycle {} seed={} -> {:?}",
                        cycle.id(),
                        seed,
                        outputs
                    );
                    cycles.push(cycle);
                }
                Err(reason) => stats.record(reason, &cycle.id(), seed),
            }
        }
        stats.profitable = cycles.len();

        info!(
            "🔺 Scanned {} triples over {} edges: {} profitable (no_q1={}, no_q2={}, no_q3={}, errors={}, unprofitable={})",
            stats.candidates,
            edges.len(),
            stats.profitable,
            stats.get("no_q1"),
            stats.get("no_q2"),
            stats.get("no_q3"),
            stats.get("quote_error"),
            stats.get("not_profitable"),
        );

        (cycles, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::edge::SwapBundle;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn create_test_pubkey(seed: u8) -> Pubkey {
        Pubkey::new_from_array([seed; 32])
    }

    /// Quotes `amount * num / den`; `den == 0` makes every quote fail
    struct RateEdge {
        id: String,
        from: Pubkey,
        to: Pubkey,
        num: u64,
        den: u64,
    }

    #[async_trait]
    impl Edge for RateEdge {
        fn id(&self) -> &str {
            &self.id
        }
        fn from_mint(&self) -> Pubkey {
            self.from
        }
        fn to_mint(&self) -> Pubkey {
            self.to
        }
        async fn quote(&self, amount_in: u64) -> Result<u64> {
            if self.den == 0 {
                return Err(anyhow!("venue offline"));
            }
            Ok(amount_in * self.num / self.den)
        }
        async fn build_swap(&self, _: u64, _: u64, _: &Pubkey) -> Result<SwapBundle> {
            Ok(SwapBundle::default())
        }
    }

    fn edge(id: &str, from: u8, to: u8, num: u64, den: u64) -> EdgeRef {
        Arc::new(RateEdge {
            id: id.to_string(),
            from: create_test_pubkey(from),
            to: create_test_pubkey(to),
            num,
            den,
        })
    }

    fn scenario_edges() -> Vec<EdgeRef> {
        vec![
            edge("ab", 1, 2, 102, 100),
            edge("bc", 2, 3, 99, 100),
            edge("ca", 3, 1, 103, 100),
        ]
    }

    #[tokio::test]
    async fn test_profitable_triangle_detected() {
        let edges = scenario_edges();
        let cycles = CycleFinder::default().find_cycles(&edges, |_| 100).await;

        assert!(cycles.iter().any(|c| c.indices == [0, 1, 2]));
        for cycle in &cycles {
            let outs = quote_chain(&cycle.legs, 100).await.unwrap();
            assert!(*outs.last().unwrap() > 100);
        }
    }

    #[tokio::test]
    async fn test_losing_triangle_rejected() {
        let edges = vec![
            edge("ab", 1, 2, 100, 100),
            edge("bc", 2, 3, 99, 100),
            edge("ca", 3, 1, 100, 100),
        ];
        let (cycles, stats) = CycleFinder::default()
            .find_cycles_with_stats(&edges, |_| 1_000)
            .await;
        assert!(cycles.is_empty());
        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.get("not_profitable"), 3);
    }

    #[tokio::test]
    async fn test_break_even_is_not_profitable() {
        let edges = vec![
            edge("ab", 1, 2, 1, 1),
            edge("bc", 2, 3, 1, 1),
            edge("ca", 3, 1, 1, 1),
        ];
        let cycles = CycleFinder::default().find_cycles(&edges, |_| 500).await;
        assert!(cycles.is_empty());
    }

    #[tokio::test]
    async fn test_failing_edge_isolated() {
        let mut edges = scenario_edges();
        // Parallel B->C venue that always errors
        edges.push(edge("bc_broken", 2, 3, 1, 0));

        let (cycles, stats) = CycleFinder::new(2)
            .find_cycles_with_stats(&edges, |_| 100)
            .await;
        assert!(cycles.iter().any(|c| c.indices == [0, 1, 2]));
        assert!(cycles.iter().all(|c| !c.indices.contains(&3)));
        assert!(stats.get("quote_error") >= 1);
    }

    #[tokio::test]
    async fn test_zero_quote_counts_by_hop() {
        let edges = vec![
            edge("ab", 1, 2, 0, 1),
            edge("bc", 2, 3, 2, 1),
            edge("ca", 3, 1, 2, 1),
        ];
        let (_, stats) = CycleFinder::default()
            .find_cycles_with_stats(&edges, |_| 100)
            .await;
        // ab first: q1 == 0; bc first: ca ok, ab is hop 3; ca first: ab is hop 2
        assert_eq!(stats.get("no_q1"), 1);
        assert_eq!(stats.get("no_q2"), 1);
        assert_eq!(stats.get("no_q3"), 1);
    }

    #[test]
    fn test_same_edge_never_reused() {
        // A self-loop cannot close a triangle with itself
        let edges = vec![edge("aa", 1, 1, 2, 1)];
        assert!(enumerate_triples(&edges).is_empty());

        let edges = vec![edge("aa", 1, 1, 2, 1), edge("aa2", 1, 1, 2, 1), edge("aa3", 1, 1, 2, 1)];
        for t in enumerate_triples(&edges) {
            assert!(t[0] != t[1] && t[1] != t[2] && t[0] != t[2]);
        }
    }

    #[test]
    fn test_adjacency_groups_by_from() {
        let edges = scenario_edges();
        let adj = adjacency(&edges);
        assert_eq!(adj.len(), 3);
        assert_eq!(adj[&create_test_pubkey(2)], vec![1]);
    }

    #[test]
    fn test_cycle_id() {
        let edges = scenario_edges();
        let cycle = Cycle {
            indices: [0, 1, 2],
            legs: [edges[0].clone(), edges[1].clone(), edges[2].clone()],
        };
        assert_eq!(cycle.id(), "ab -> bc -> ca");
        assert_eq!(cycle.start_mint(), create_test_pubkey(1));
    }
}
