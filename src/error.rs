//! # Arbitrage Error Taxonomy
//!
//! Typed failures raised by the decision-and-execution pipeline. Each variant maps
//! to one handling rule in the orchestrator: rejections drop the candidate, safety
//! violations drop it loudly, simulation and execution failures count against the
//! risk governor, and table lifecycle failures fall back to legacy encoding.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbError {
    #[error("quote rejected by edge {edge}: {reason}")]
    QuoteRejected { edge: String, reason: String },

    #[error(
        "build rejected by edge {edge} ({from} -> {to}, in={amount_in}, min_out={min_out}): {reason}"
    )]
    BuildRejected {
        edge: String,
        from: Pubkey,
        to: Pubkey,
        amount_in: u64,
        min_out: u64,
        reason: String,
    },

    #[error("unauthorized signer {account} required by {kind} at instruction #{instruction_index}")]
    SafetyViolation {
        instruction_index: usize,
        account: Pubkey,
        kind: String,
    },

    #[error("malformed system instruction #{instruction_index}: {kind} expects at least {expected} accounts")]
    MalformedInstruction {
        instruction_index: usize,
        kind: String,
        expected: usize,
    },

    #[error("simulation failed: {error}")]
    SimulationFailed { error: String, logs: Vec<String> },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("confirmation timed out for {0}")]
    ConfirmationTimeout(Signature),

    #[error("address table lifecycle failure: {0}")]
    TableLifecycle(String),

    #[error("transaction is {size} bytes, limit is {limit}")]
    Oversized { size: usize, limit: usize },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl ArbError {
    /// Failures that the risk governor counts.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            ArbError::SimulationFailed { .. }
                | ArbError::ExecutionFailed(_)
                | ArbError::ConfirmationTimeout(_)
        )
    }
}
