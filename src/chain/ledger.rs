// Ledger client seam
//
// Everything the core needs from the chain goes through `Ledger`, so the packer
// and orchestrator can be driven by an in-memory ledger in tests. `RpcLedger`
// is the production implementation over the nonblocking `RpcClient`.
//
// Traffic is split across two endpoints:
// - read client: accounts, slots, balances
// - send client: blockhash, simulate, send, confirm (defaults to the read client)

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig},
};
use solana_sdk::{
    account::Account,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::TransactionConfirmationStatus;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::utils::RetryPolicy;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Result of a dry run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutcome {
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

impl SimulationOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Terminal state of a broadcast transaction as far as this process cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { slot: u64 },
    Failed(String),
    TimedOut,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Current slot at processed commitment
    async fn slot(&self) -> Result<u64>;

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome>;

    async fn send_raw(&self, tx: &VersionedTransaction) -> Result<Signature>;

    /// Wait until `signature` lands, fails, its blockhash expires, or `timeout` passes.
    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        timeout: Duration,
    ) -> Result<Confirmation>;

    async fn account(&self, address: &Pubkey) -> Result<Option<Account>>;

    async fn multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;

    async fn balance(&self, address: &Pubkey) -> Result<u64>;
}

/// `Ledger` over JSON-RPC
pub struct RpcLedger {
    rpc_client: Arc<RpcClient>,
    send_client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    retry: RetryPolicy,
}

impl RpcLedger {
    pub fn new(rpc_client: Arc<RpcClient>, commitment: &str) -> Result<Self> {
        let commitment = CommitmentConfig::from_str(commitment)
            .map_err(|e| anyhow::anyhow!("invalid commitment '{}': {:?}", commitment, e))?;
        info!("Initializing RpcLedger (commitment={:?})", commitment.commitment);
        Ok(Self {
            send_client: rpc_client.clone(),
            rpc_client,
            commitment,
            retry: RetryPolicy::default(),
        })
    }

    /// Route blockhash, simulation, broadcast and confirmation through `client`.
    pub fn with_send_client(mut self, client: Arc<RpcClient>) -> Self {
        info!("Send traffic routed to {}", client.url());
        self.send_client = client;
        self
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.rpc_client
    }

    pub fn send_client(&self) -> &Arc<RpcClient> {
        &self.send_client
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn latest_blockhash(&self) -> Result<Hash> {
        let client = &self.send_client;
        let commitment = self.commitment;
        let (hash, _) = self
            .retry
            .retry_async(move || client.get_latest_blockhash_with_commitment(commitment))
            .await
            .context("Failed to get recent blockhash")?;
        Ok(hash)
    }

    async fn slot(&self) -> Result<u64> {
        self.rpc_client
            .get_slot_with_commitment(CommitmentConfig::processed())
            .await
            .context("Failed to get slot")
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome> {
        // Signatures are already present; skip verification and keep our blockhash
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(CommitmentConfig::processed()),
            encoding: None,
            accounts: None,
            min_context_slot: None,
            inner_instructions: false,
        };

        let response = self
            .send_client
            .simulate_transaction_with_config(tx, config)
            .await
            .context("Simulation RPC call failed")?;
        let value = response.value;

        let outcome = SimulationOutcome {
            error: value.err.map(|e| format!("{:?}", e)),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        };
        if let Some(units) = outcome.units_consumed {
            debug!("   Compute units consumed: {}", units);
        }
        Ok(outcome)
    }

    async fn send_raw(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let send_config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(CommitmentLevel::Processed),
            encoding: None,
            max_retries: Some(0),
            min_context_slot: None,
        };
        self.send_client
            .send_transaction_with_config(tx, send_config)
            .await
            .context("Failed to send transaction")
    }

    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        timeout_after: Duration,
    ) -> Result<Confirmation> {
        let client = &self.send_client;

        let polled = timeout(timeout_after, async {
            loop {
                match client.get_signature_statuses(&[*signature]).await {
                    Ok(response) => match response.value.first() {
                        Some(Some(status)) => {
                            if let Some(err) = &status.err {
                                return Confirmation::Failed(format!("{:?}", err));
                            }
                            if matches!(
                                status.confirmation_status,
                                Some(TransactionConfirmationStatus::Confirmed)
                                    | Some(TransactionConfirmationStatus::Finalized)
                            ) {
                                return Confirmation::Confirmed { slot: status.slot };
                            }
                        }
                        _ => {
                            let still_valid = client
                                .is_blockhash_valid(blockhash, CommitmentConfig::processed())
                                .await
                                .unwrap_or(true);
                            if !still_valid {
                                return Confirmation::Failed("blockhash expired".to_string());
                            }
                        }
                    },
                    Err(e) => {
                        debug!("Error checking signature status: {}", e);
                    }
                }

                sleep(CONFIRM_POLL_INTERVAL).await;
            }
        })
        .await;

        match polled {
            Ok(confirmation) => Ok(confirmation),
            Err(_) => {
                warn!("⏱️  Confirmation timeout after {:?} for {}", timeout_after, signature);
                Ok(Confirmation::TimedOut)
            }
        }
    }

    async fn account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self
            .rpc_client
            .get_account_with_commitment(address, self.commitment)
            .await
            .with_context(|| format!("Failed to fetch account {}", address))?
            .value)
    }

    async fn multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .rpc_client
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await
            .context("Failed to fetch multiple accounts")?
            .value)
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64> {
        self.rpc_client
            .get_balance(address)
            .await
            .with_context(|| format!("Failed to fetch balance of {}", address))
    }
}
