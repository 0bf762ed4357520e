// Execution Orchestrator
//
// One tick:
// 1. Discover profitable cycles at the seed size
// 2. Drop paths the hop policy forbids
// 3. Per cycle: size -> fresh re-quote -> build -> pack -> sign -> simulate -> (send -> confirm)
// 4. Feed outcomes into the fee controller, risk governor, metrics and session report
//
// Candidates are executed strictly one after another; the orchestrator owns the
// fee state and the packer, so nothing here needs a lock.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fees::{FeeController, FeeState, RiskGovernor};
use super::ledger::{Confirmation, Ledger};
use super::packer::TransactionPacker;
use crate::chain::constants::seed_for_mint;
use crate::config::{Config, RuntimeMode};
use crate::dex::edge::{Edge, EdgeRef};
use crate::dex::sizing::{best_size, SizingResult};
use crate::dex::triangular_arb::{quote_chain, Cycle, CycleFinder, DropReason};
use crate::error::ArbError;
use crate::metrics::Metrics;
use crate::reporting::{AttemptOutcome, SessionReport};

const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// `quoted` reduced by `bps`, never below 1
pub fn min_out_with_slippage(quoted: u64, bps: u64) -> u64 {
    let keep = 10_000u64.saturating_sub(bps.min(10_000)) as u128;
    ((quoted as u128 * keep / 10_000) as u64).max(1)
}

/// What happened to one sized candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executed {
    /// Fresh quotes no longer close above the input
    Stale { fresh_out: u64 },
    /// Passed simulation in simulate mode
    DryRun,
    Confirmed(Signature),
}

/// Per-tick counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub cycles: usize,
    pub filtered_by_hops: usize,
    pub attempted: usize,
    pub dry_runs: usize,
    pub confirmed: usize,
    pub failures: usize,
    /// Tick ended early on a simulation failure
    pub halted: bool,
}

/// Instructions, signers and tables of a whole cycle
#[derive(Default)]
struct CycleBundle {
    instructions: Vec<Instruction>,
    extra_signers: Vec<Arc<Keypair>>,
    lookup_tables: Vec<Pubkey>,
}

impl CycleBundle {
    fn signer_keys(&self) -> Vec<Pubkey> {
        self.extra_signers.iter().map(|kp| kp.pubkey()).collect()
    }

    fn add_signer(&mut self, signer: Arc<Keypair>) {
        if !self.extra_signers.iter().any(|kp| kp.pubkey() == signer.pubkey()) {
            self.extra_signers.push(signer);
        }
    }

    fn add_table(&mut self, table: Pubkey) {
        if !self.lookup_tables.contains(&table) {
            self.lookup_tables.push(table);
        }
    }
}

pub struct Orchestrator {
    config: Config,
    edges: Vec<EdgeRef>,
    finder: CycleFinder,
    ledger: Arc<dyn Ledger>,
    payer: Arc<Keypair>,
    packer: TransactionPacker,
    fee_controller: FeeController,
    governor: RiskGovernor,
    state: FeeState,
    metrics: Metrics,
    report: SessionReport,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        edges: Vec<EdgeRef>,
        ledger: Arc<dyn Ledger>,
        payer: Arc<Keypair>,
        metrics: Metrics,
    ) -> Self {
        let packer = TransactionPacker::new(ledger.clone(), payer.clone())
            .with_runtime_table(config.routing.runtime_lookup_table)
            .with_confirm_timeout(config.execution.confirm_timeout());
        let state = FeeState::new(config.fees.start);
        metrics.observe_fees(&state);

        Self {
            finder: CycleFinder::new(config.execution.quote_concurrency),
            fee_controller: FeeController::from_config(&config.fees),
            governor: RiskGovernor::from_config(&config.risk),
            config,
            edges,
            ledger,
            payer,
            packer,
            state,
            metrics,
            report: SessionReport::new(),
        }
    }

    /// Replace the default packer, e.g. to tune table retries.
    pub fn with_packer(mut self, packer: TransactionPacker) -> Self {
        self.packer = packer;
        self
    }

    pub fn state(&self) -> &FeeState {
        &self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn packer(&self) -> &TransactionPacker {
        &self.packer
    }

    /// Tick until cancelled (or once). Tick errors are logged and followed by a short pause.
    pub async fn run(&mut self, cancel: CancellationToken, once: bool) {
        info!(
            "🔄 Loop starting: {} edges, mode={}, fee={} µL/CU",
            self.edges.len(),
            self.config.execution.mode,
            self.state.priority_fee
        );

        while !cancel.is_cancelled() {
            match self.tick(&cancel).await {
                Ok(summary) => {
                    debug!("tick: {:?}", summary);
                    info!("📊 {}", self.metrics.summary());
                }
                Err(e) => {
                    error!("❌ Tick failed: {:#}", e);
                    pause(ERROR_PAUSE, &cancel).await;
                }
            }
            if once {
                break;
            }
            pause(self.config.execution.tick_delay(), &cancel).await;
        }
        info!("🛑 Loop stopped");
    }

    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<TickSummary, ArbError> {
        let mut summary = TickSummary::default();

        let ladder_seed = if self.config.sizing.seed_from_ladder {
            self.config.sizing.ladder.first().copied()
        } else {
            None
        };
        let cycles = self
            .finder
            .find_cycles(&self.edges, |edge: &dyn Edge| {
                ladder_seed.unwrap_or_else(|| seed_for_mint(&edge.from_mint()))
            })
            .await;
        summary.cycles = cycles.len();
        self.metrics.cycles_found.inc_by(cycles.len() as u64);

        let routing = &self.config.routing;
        let (allowed, filtered): (Vec<Cycle>, Vec<Cycle>) =
            cycles.into_iter().partition(|c| routing.allows_hops(c.hops()));
        summary.filtered_by_hops = filtered.len();
        if !filtered.is_empty() {
            debug!(
                "{} cycle(s) exceed the hop policy (max_hops={}, static tables={})",
                filtered.len(),
                routing.max_hops,
                routing.static_lookup_tables.len()
            );
        }

        for cycle in &allowed {
            if cancel.is_cancelled() {
                break;
            }

            let Some(sizing) =
                best_size(cycle, &self.config.sizing.ladder, self.config.sizing.policy).await
            else {
                debug!("no profitable size for {}", cycle.id());
                continue;
            };
            summary.attempted += 1;
            info!(
                "🎯 {} in={} expected_out={} (+{})",
                cycle.id(),
                sizing.in_amount,
                sizing.out_amount,
                sizing.profit()
            );

            let fee = self.state.priority_fee;
            let result = self.execute(cycle, sizing).await;
            let outcome = match &result {
                Ok(Executed::Stale { fresh_out }) => {
                    info!("⌛ {} stale: fresh quote {} <= {}", cycle.id(), fresh_out, sizing.in_amount);
                    AttemptOutcome::Skipped(format!("stale quote ({} <= {})", fresh_out, sizing.in_amount))
                }
                Ok(Executed::DryRun) => {
                    summary.dry_runs += 1;
                    self.governor.on_success(&mut self.state);
                    info!("🧪 {} passed simulation (dry run)", cycle.id());
                    AttemptOutcome::DryRun
                }
                Ok(Executed::Confirmed(signature)) => {
                    summary.confirmed += 1;
                    self.governor.on_success(&mut self.state);
                    info!("✅ {} confirmed: {}", cycle.id(), signature);
                    AttemptOutcome::Confirmed
                }
                Err(ArbError::SimulationFailed { error, logs }) => {
                    summary.failures += 1;
                    self.metrics.trades_sim_failed.inc();
                    warn!("🧪 {} simulation failed: {}", cycle.id(), error);
                    for line in logs.iter().rev().take(5).rev() {
                        debug!("   {}", line);
                    }
                    AttemptOutcome::SimulationFailed(error.clone())
                }
                Err(e) if e.counts_as_failure() => {
                    summary.failures += 1;
                    self.metrics.trades_exec_failed.inc();
                    warn!("💥 {} execution failed: {}", cycle.id(), e);
                    AttemptOutcome::ExecutionFailed(e.to_string())
                }
                Err(ArbError::Ledger(reason)) => {
                    return Err(ArbError::Ledger(reason.clone()));
                }
                Err(e @ ArbError::SafetyViolation { .. }) | Err(e @ ArbError::MalformedInstruction { .. }) => {
                    error!("🛑 {} dropped by allocation guard: {}", cycle.id(), e);
                    AttemptOutcome::Skipped(e.to_string())
                }
                Err(e) => {
                    warn!("⏭️  {} dropped: {}", cycle.id(), e);
                    AttemptOutcome::Skipped(e.to_string())
                }
            };

            let signature = match &result {
                Ok(Executed::Confirmed(sig)) => Some(sig.to_string()),
                Err(ArbError::ConfirmationTimeout(sig)) => Some(sig.to_string()),
                _ => None,
            };
            self.report.record(
                &cycle.id(),
                sizing.in_amount,
                sizing.out_amount,
                fee,
                outcome,
                signature,
            );

            if let Err(e) = &result {
                if e.counts_as_failure() {
                    if let Some(cooldown) = self.governor.on_failure(&mut self.state) {
                        pause(cooldown, cancel).await;
                    }
                    if matches!(e, ArbError::SimulationFailed { .. })
                        && self.config.execution.halt_on_sim_failure
                    {
                        warn!("⛔ Halting tick after simulation failure");
                        summary.halted = true;
                        break;
                    }
                }
            }
        }

        self.metrics.observe_fees(&self.state);
        Ok(summary)
    }

    /// Re-quote, build, pack and (depending on mode) broadcast one sized cycle.
    async fn execute(&mut self, cycle: &Cycle, sizing: SizingResult) -> Result<Executed, ArbError> {
        let fresh = quote_chain(&cycle.legs, sizing.in_amount)
            .await
            .map_err(|reason| quote_rejection(cycle, reason))?;
        let fresh_out = fresh.last().copied().unwrap_or(0);
        if fresh_out <= sizing.in_amount {
            return Ok(Executed::Stale { fresh_out });
        }

        let bundle = self.build_bundle(cycle, sizing.in_amount, &fresh).await?;
        let signer_keys = bundle.signer_keys();
        let mut tables = bundle.lookup_tables.clone();
        for table in &self.config.routing.static_lookup_tables {
            if !tables.contains(table) {
                tables.push(*table);
            }
        }

        let packed = self
            .packer
            .pack(
                &bundle.instructions,
                self.config.execution.compute_unit_limit,
                self.state.priority_fee,
                &signer_keys,
                &tables,
            )
            .await?;
        let blockhash = packed.recent_blockhash();
        let tx = packed.sign(&self.payer, &bundle.extra_signers)?;
        debug!(
            "packed {} ({} bytes, {} table(s))",
            cycle.id(),
            packed.size(),
            packed.tables().len()
        );

        // Simulate mode always simulates; a dry run means the ledger accepted it
        let simulate =
            self.config.execution.simulate_before_send || self.config.execution.mode == RuntimeMode::Simulate;
        if simulate {
            let simulation = self
                .ledger
                .simulate(&tx)
                .await
                .map_err(|e| ArbError::Ledger(format!("{:#}", e)))?;
            if let Some(error) = simulation.error {
                return Err(ArbError::SimulationFailed {
                    error,
                    logs: simulation.logs,
                });
            }
            if let Some(units) = simulation.units_consumed {
                debug!("simulation used {} CU", units);
            }
        }

        if self.config.execution.mode == RuntimeMode::Simulate {
            return Ok(Executed::DryRun);
        }

        // Every broadcast attempt counts toward the inclusion ratio, rejected ones included
        let sent = self.ledger.send_raw(&tx).await;
        self.state.sent += 1;
        self.metrics.trades_sent.inc();
        let result = match sent {
            Ok(signature) => {
                info!("📤 Sent {} (fee {} µL/CU)", signature, self.state.priority_fee);
                self.await_confirmation(signature, &blockhash).await
            }
            Err(e) => Err(ArbError::ExecutionFailed(format!("send failed: {:#}", e))),
        };
        self.fee_controller.tune(&mut self.state);
        result
    }

    async fn await_confirmation(&mut self, signature: Signature, blockhash: &Hash) -> Result<Executed, ArbError> {
        let confirmation = self
            .ledger
            .confirm(&signature, blockhash, self.config.execution.confirm_timeout())
            .await;
        match confirmation {
            Ok(Confirmation::Confirmed { slot }) => {
                self.state.confirmed += 1;
                self.metrics.trades_confirmed.inc();
                debug!("{} landed in slot {}", signature, slot);
                Ok(Executed::Confirmed(signature))
            }
            Ok(Confirmation::Failed(reason)) => Err(ArbError::ExecutionFailed(format!("{}: {}", signature, reason))),
            Ok(Confirmation::TimedOut) => Err(ArbError::ConfirmationTimeout(signature)),
            Err(e) => Err(ArbError::ExecutionFailed(format!(
                "{}: confirmation polling failed: {:#}",
                signature, e
            ))),
        }
    }

    async fn build_bundle(&self, cycle: &Cycle, amount_in: u64, fresh: &[u64]) -> Result<CycleBundle, ArbError> {
        let payer = self.payer.pubkey();
        let slippage = self.config.execution.max_slippage_bps;
        let mut bundle = CycleBundle::default();
        let mut hop_in = amount_in;

        for (leg, &quoted) in cycle.legs.iter().zip(fresh) {
            let min_out = min_out_with_slippage(quoted, slippage);
            let hop = leg
                .build_swap(hop_in, min_out, &payer)
                .await
                .map_err(|e| ArbError::BuildRejected {
                    edge: leg.id().to_string(),
                    from: leg.from_mint(),
                    to: leg.to_mint(),
                    amount_in: hop_in,
                    min_out,
                    reason: format!("{:#}", e),
                })?;

            bundle.instructions.extend(hop.instructions);
            for signer in hop.extra_signers {
                bundle.add_signer(signer);
            }
            for table in hop.lookup_tables {
                bundle.add_table(table);
            }
            hop_in = quoted;
        }
        Ok(bundle)
    }
}

fn quote_rejection(cycle: &Cycle, reason: DropReason) -> ArbError {
    let edge = match reason {
        DropReason::ZeroQuote { hop } | DropReason::QuoteError { hop } => cycle
            .legs
            .get(hop.saturating_sub(1))
            .map(|leg| leg.id().to_string())
            .unwrap_or_else(|| cycle.id()),
        DropReason::NotProfitable => cycle.id(),
    };
    ArbError::QuoteRejected {
        edge,
        reason: format!("fresh re-quote {}", reason.label()),
    }
}

/// Sleep unless cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_out_with_slippage() {
        assert_eq!(min_out_with_slippage(10_000, 0), 10_000);
        assert_eq!(min_out_with_slippage(10_000, 50), 9_950);
        assert_eq!(min_out_with_slippage(3, 5_000), 1);
        assert_eq!(min_out_with_slippage(0, 0), 1);
        assert_eq!(min_out_with_slippage(u64::MAX, 10), (u64::MAX as u128 * 9_990 / 10_000) as u64);
        assert_eq!(min_out_with_slippage(1_000, 20_000), 1);
    }

    #[tokio::test]
    async fn test_pause_returns_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        pause(Duration::from_secs(30), &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_bundle_dedups_signers_and_tables() {
        let mut bundle = CycleBundle::default();
        let kp = Arc::new(Keypair::new());
        let table = Pubkey::new_unique();
        bundle.add_signer(kp.clone());
        bundle.add_signer(kp.clone());
        bundle.add_table(table);
        bundle.add_table(table);
        assert_eq!(bundle.signer_keys(), vec![kp.pubkey()]);
        assert_eq!(bundle.lookup_tables, vec![table]);
    }
}
