// Trade size selection over a discrete ladder.

use anyhow::bail;
use std::str::FromStr;
use tracing::debug;

use super::triangular_arb::{quote_chain, Cycle};

/// How to pick a rung once a cycle is known to be profitable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizingPolicy {
    /// Largest rung that is still profitable, scanning from the top
    #[default]
    LargestProfitable,
    /// Rung with the greatest absolute `out - in`
    MaxProfit,
}

impl FromStr for SizingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "largest" | "largest_profitable" | "conservative" => Ok(SizingPolicy::LargestProfitable),
            "max_profit" | "max-profit" | "profit" => Ok(SizingPolicy::MaxProfit),
            other => bail!("unknown sizing policy '{}', expected largest|max_profit", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingResult {
    pub in_amount: u64,
    pub out_amount: u64,
}

impl SizingResult {
    pub fn profit(&self) -> u64 {
        self.out_amount.saturating_sub(self.in_amount)
    }
}

/// Pick a ladder rung for `cycle`, or `None` when no rung is profitable.
/// Rungs with a zero or failing hop are skipped.
pub async fn best_size(cycle: &Cycle, ladder: &[u64], policy: SizingPolicy) -> Option<SizingResult> {
    let mut rungs: Vec<u64> = ladder.iter().copied().filter(|&r| r > 0).collect();
    rungs.sort_unstable();
    rungs.dedup();

    match policy {
        SizingPolicy::LargestProfitable => {
            for &amount in rungs.iter().rev() {
                if let Some(result) = evaluate(cycle, amount).await {
                    return Some(result);
                }
            }
            None
        }
        SizingPolicy::MaxProfit => {
            let mut best: Option<SizingResult> = None;
            for &amount in &rungs {
                if let Some(result) = evaluate(cycle, amount).await {
                    if best.map_or(true, |b| result.profit() > b.profit()) {
                        best = Some(result);
                    }
                }
            }
            best
        }
    }
}

async fn evaluate(cycle: &Cycle, amount: u64) -> Option<SizingResult> {
    match quote_chain(&cycle.legs, amount).await {
        Ok(outputs) => {
            let out_amount = outputs.last().copied().unwrap_or(0);
            debug!("size {} on {} -> {}", amount, cycle.id(), out_amount);
            (out_amount > amount).then_some(SizingResult {
                in_amount: amount,
                out_amount,
            })
        }
        Err(reason) => {
            debug!("size {} on {} skipped: {}", amount, cycle.id(), reason.label());
            None
        }
    }
}
