use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Attempts kept verbatim for the report table
pub const DEFAULT_RECENT_ATTEMPTS: usize = 200;
/// Distinct failure reasons tracked before folding the rest into one bucket
const MAX_FAILURE_REASONS: usize = 64;
const OTHER_REASONS: &str = "(other reasons)";

/// How one attempted cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Simulated successfully, not broadcast
    DryRun,
    Confirmed,
    /// Dropped before broadcast (stale quote, build rejection, safety guard, oversized)
    Skipped(String),
    SimulationFailed(String),
    ExecutionFailed(String),
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::DryRun => "dry-run",
            AttemptOutcome::Confirmed => "confirmed",
            AttemptOutcome::Skipped(_) => "skipped",
            AttemptOutcome::SimulationFailed(_) => "sim-failed",
            AttemptOutcome::ExecutionFailed(_) => "exec-failed",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Skipped(r)
            | AttemptOutcome::SimulationFailed(r)
            | AttemptOutcome::ExecutionFailed(r) => Some(r),
            _ => None,
        }
    }
}

/// One attempted cycle
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub at: DateTime<Utc>,
    pub cycle: String,
    pub amount_in: u64,
    pub expected_out: u64,
    pub priority_fee: u64,
    pub outcome: AttemptOutcome,
    pub signature: Option<String>,
}

impl AttemptRecord {
    pub fn expected_profit(&self) -> u64 {
        self.expected_out.saturating_sub(self.amount_in)
    }
}

/// Whole-session outcome counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTotals {
    pub attempts: u64,
    pub confirmed: u64,
    pub dry_runs: u64,
    pub sim_failed: u64,
    pub exec_failed: u64,
    pub skipped: u64,
}

impl OutcomeTotals {
    fn add(&mut self, outcome: &AttemptOutcome) {
        self.attempts += 1;
        match outcome {
            AttemptOutcome::DryRun => self.dry_runs += 1,
            AttemptOutcome::Confirmed => self.confirmed += 1,
            AttemptOutcome::Skipped(_) => self.skipped += 1,
            AttemptOutcome::SimulationFailed(_) => self.sim_failed += 1,
            AttemptOutcome::ExecutionFailed(_) => self.exec_failed += 1,
        }
    }
}

/// Session totals plus a bounded window of recent attempts, rendered as Markdown on shutdown
#[derive(Debug, Clone)]
pub struct SessionReport {
    started: DateTime<Utc>,
    totals: OutcomeTotals,
    profit_by_cycle: HashMap<String, u64>,
    failure_reasons: HashMap<String, u64>,
    recent: VecDeque<AttemptRecord>,
    capacity: usize,
}

impl Default for SessionReport {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECENT_ATTEMPTS)
    }

    /// Keep at most `capacity` attempts verbatim; totals cover the whole session.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            started: Utc::now(),
            totals: OutcomeTotals::default(),
            profit_by_cycle: HashMap::new(),
            failure_reasons: HashMap::new(),
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(
        &mut self,
        cycle: &str,
        amount_in: u64,
        expected_out: u64,
        priority_fee: u64,
        outcome: AttemptOutcome,
        signature: Option<String>,
    ) {
        let record = AttemptRecord {
            at: Utc::now(),
            cycle: cycle.to_string(),
            amount_in,
            expected_out,
            priority_fee,
            outcome,
            signature,
        };

        self.totals.add(&record.outcome);
        if matches!(record.outcome, AttemptOutcome::Confirmed | AttemptOutcome::DryRun) {
            *self.profit_by_cycle.entry(record.cycle.clone()).or_insert(0) += record.expected_profit();
        }
        if let Some(reason) = record.outcome.reason() {
            let key = if self.failure_reasons.contains_key(reason)
                || self.failure_reasons.len() < MAX_FAILURE_REASONS
            {
                reason.to_string()
            } else {
                OTHER_REASONS.to_string()
            };
            *self.failure_reasons.entry(key).or_insert(0) += 1;
        }

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    /// Most recent attempts, oldest first
    pub fn records(&self) -> &VecDeque<AttemptRecord> {
        &self.recent
    }

    pub fn totals(&self) -> &OutcomeTotals {
        &self.totals
    }

    /// Matching attempts within the retained window
    pub fn count(&self, matches: impl Fn(&AttemptOutcome) -> bool) -> usize {
        self.recent.iter().filter(|r| matches(&r.outcome)).count()
    }

    /// Most frequent failure reasons, at most `limit`
    fn top_failures(&self, limit: usize) -> Vec<(String, u64)> {
        let mut top: Vec<(String, u64)> = self
            .failure_reasons
            .iter()
            .map(|(reason, count)| (reason.clone(), *count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(limit);
        top
    }

    pub fn render_markdown(&self) -> String {
        let mut report = String::new();
        let ended = Utc::now();

        report.push_str("# Triangular Arbitrage Session Report\n\n");
        report.push_str(&format!(
            "- **Window**: {} → {}\n",
            self.started.to_rfc3339(),
            ended.to_rfc3339()
        ));
        let totals = &self.totals;
        report.push_str(&format!("- **Attempts**: {}\n", totals.attempts));

        if totals.attempts == 0 {
            report.push_str("\nNo candidates were attempted.\n");
            return report;
        }

        report.push_str(&format!("- **Confirmed**: {}\n", totals.confirmed));
        report.push_str(&format!("- **Dry runs**: {}\n", totals.dry_runs));
        report.push_str(&format!("- **Simulation failures**: {}\n", totals.sim_failed));
        report.push_str(&format!("- **Execution failures**: {}\n", totals.exec_failed));
        report.push_str(&format!("- **Skipped**: {}\n\n", totals.skipped));

        if !self.profit_by_cycle.is_empty() {
            let mut rows: Vec<(&str, u64)> = self
                .profit_by_cycle
                .iter()
                .map(|(cycle, profit)| (cycle.as_str(), *profit))
                .collect();
            rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            report.push_str("## Expected Profit by Cycle\n\n");
            report.push_str("| Cycle | Expected profit (base units) |\n|---|---|\n");
            for (cycle, profit) in rows {
                report.push_str(&format!("| {} | {} |\n", cycle, profit));
            }
            report.push('\n');
        }

        let failures = self.top_failures(3);
        if !failures.is_empty() {
            report.push_str("## Top Failure Reasons\n\n");
            for (i, (reason, count)) in failures.iter().enumerate() {
                report.push_str(&format!("{}. **{}** × `{}`\n", i + 1, count, reason));
            }
            report.push('\n');
        }

        report.push_str(&format!(
            "## Recent Attempts (last {} of {})\n\n",
            self.recent.len(),
            totals.attempts
        ));
        report.push_str("| Time | Cycle | In | Expected out | Fee | Outcome | Signature |\n");
        report.push_str("|---|---|---|---|---|---|---|\n");
        for r in &self.recent {
            report.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                r.at.format("%H:%M:%S%.3f"),
                r.cycle,
                r.amount_in,
                r.expected_out,
                r.priority_fee,
                r.outcome.label(),
                r.signature.as_deref().unwrap_or("-"),
            ));
        }
        report
    }
}
