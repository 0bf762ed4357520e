// Helper utilities for integration tests
//
// This module provides:
// - An in-memory ledger that executes lookup-table create/extend transactions
// - Fixed-rate edges with configurable instruction footprints
// - A complete Config with test-friendly values

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    address_lookup_table::{
        self,
        instruction::ProgramInstruction,
        state::{AddressLookupTable, LookupTableMeta},
    },
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::VersionedTransaction,
};
use solana_tri_arb::{
    chain::{Confirmation, Ledger, SimulationOutcome},
    config::{
        Config, ExecutionConfig, FeeConfig, JupiterConfig, LoggingConfig, MetricsConfig, RiskConfig,
        RoutingConfig, RpcConfig, RuntimeMode, SizingConfig, WalletConfig,
    },
    dex::{Edge, EdgeRef, SizingPolicy, SwapBundle},
};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// In-memory ledger
// ============================================================================

#[derive(Default)]
pub struct FakeLedger {
    accounts: Mutex<HashMap<Pubkey, Account>>,
    slot: AtomicU64,
    blockhash: Mutex<Hash>,
    /// Scripted outcomes for non-table simulations; empty means success
    trade_simulations: Mutex<VecDeque<SimulationOutcome>>,
    /// Scripted errors for table simulations; empty means success
    table_simulation_errors: Mutex<VecDeque<String>>,
    /// Scripted confirmations for trades; empty means confirmed
    confirmations: Mutex<VecDeque<Confirmation>>,
    /// Scripted broadcast errors for trades; empty means accepted
    send_errors: Mutex<VecDeque<String>>,
    /// Drop lookup-table creates on the floor while still confirming them
    swallow_creates: Mutex<bool>,
    pub creates: AtomicUsize,
    pub extends: AtomicUsize,
    pub trade_sends: AtomicUsize,
    pub simulations: AtomicUsize,
    pub sent: Mutex<Vec<VersionedTransaction>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.slot.store(1_000, Ordering::SeqCst);
        *ledger.blockhash.lock().unwrap() = Hash::new_unique();
        ledger
    }

    pub fn script_trade_simulation(&self, outcome: SimulationOutcome) {
        self.trade_simulations.lock().unwrap().push_back(outcome);
    }

    pub fn fail_trade_simulations(&self, n: usize, error: &str) {
        for _ in 0..n {
            self.script_trade_simulation(SimulationOutcome {
                error: Some(error.to_string()),
                logs: vec![format!("Program log: {}", error)],
                units_consumed: None,
            });
        }
    }

    pub fn script_table_simulation_error(&self, error: &str) {
        self.table_simulation_errors.lock().unwrap().push_back(error.to_string());
    }

    pub fn script_confirmation(&self, confirmation: Confirmation) {
        self.confirmations.lock().unwrap().push_back(confirmation);
    }

    /// Reject the next `n` trade broadcasts with `error`.
    pub fn fail_trade_sends(&self, n: usize, error: &str) {
        let mut errors = self.send_errors.lock().unwrap();
        for _ in 0..n {
            errors.push_back(error.to_string());
        }
    }

    pub fn swallow_creates(&self, swallow: bool) {
        *self.swallow_creates.lock().unwrap() = swallow;
    }

    /// Install a lookup table account directly.
    pub fn insert_table(&self, address: Pubkey, addresses: Vec<Pubkey>, deactivated: bool) {
        let meta = if deactivated {
            LookupTableMeta {
                deactivation_slot: 10,
                ..LookupTableMeta::default()
            }
        } else {
            LookupTableMeta::default()
        };
        self.store_table(address, meta, addresses);
    }

    pub fn table_addresses(&self, address: &Pubkey) -> Option<Vec<Pubkey>> {
        let accounts = self.accounts.lock().unwrap();
        let account = accounts.get(address)?;
        let table = AddressLookupTable::deserialize(&account.data).ok()?;
        Some(table.addresses.to_vec())
    }

    pub fn table_count(&self) -> usize {
        self.accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.owner == address_lookup_table::program::id())
            .count()
    }

    fn store_table(&self, address: Pubkey, meta: LookupTableMeta, addresses: Vec<Pubkey>) {
        let data = AddressLookupTable {
            meta,
            addresses: Cow::Owned(addresses),
        }
        .serialize_for_tests()
        .expect("serialize lookup table");
        self.accounts.lock().unwrap().insert(
            address,
            Account {
                lamports: 1_000_000,
                data,
                owner: address_lookup_table::program::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    /// Decode the single lookup-table instruction of `tx`, if it is one.
    fn table_instruction(tx: &VersionedTransaction) -> Option<(ProgramInstruction, Vec<Pubkey>)> {
        let keys = tx.message.static_account_keys();
        tx.message.instructions().iter().find_map(|ix| {
            let program = keys.get(ix.program_id_index as usize)?;
            if *program != address_lookup_table::program::id() {
                return None;
            }
            let decoded = bincode::deserialize::<ProgramInstruction>(&ix.data).ok()?;
            let accounts = ix
                .accounts
                .iter()
                .filter_map(|i| keys.get(*i as usize).copied())
                .collect();
            Some((decoded, accounts))
        })
    }

    fn apply_table_instruction(&self, ix: ProgramInstruction, accounts: Vec<Pubkey>) -> Result<()> {
        let Some(table) = accounts.first().copied() else {
            bail!("table instruction without accounts");
        };
        match ix {
            ProgramInstruction::CreateLookupTable { .. } => {
                self.creates.fetch_add(1, Ordering::SeqCst);
                if !*self.swallow_creates.lock().unwrap() {
                    self.store_table(table, LookupTableMeta::default(), Vec::new());
                }
            }
            ProgramInstruction::ExtendLookupTable { new_addresses } => {
                self.extends.fetch_add(1, Ordering::SeqCst);
                let mut current = self.table_addresses(&table).unwrap_or_default();
                current.extend(new_addresses);
                self.store_table(table, LookupTableMeta::default(), current);
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(*self.blockhash.lock().unwrap())
    }

    async fn slot(&self) -> Result<u64> {
        Ok(self.slot.fetch_add(1, Ordering::SeqCst))
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome> {
        self.simulations.fetch_add(1, Ordering::SeqCst);
        if Self::table_instruction(tx).is_some() {
            return Ok(match self.table_simulation_errors.lock().unwrap().pop_front() {
                Some(error) => SimulationOutcome {
                    logs: vec![format!("Program log: {}", error)],
                    error: Some("InstructionError(0, InvalidInstructionData)".to_string()),
                    units_consumed: None,
                },
                None => SimulationOutcome::default(),
            });
        }
        Ok(self
            .trade_simulations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SimulationOutcome {
                error: None,
                logs: vec!["Program log: ok".to_string()],
                units_consumed: Some(120_000),
            }))
    }

    async fn send_raw(&self, tx: &VersionedTransaction) -> Result<Signature> {
        match Self::table_instruction(tx) {
            Some((ix, accounts)) => self.apply_table_instruction(ix, accounts)?,
            None => {
                if let Some(error) = self.send_errors.lock().unwrap().pop_front() {
                    bail!("send rejected: {}", error);
                }
                self.trade_sends.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.sent.lock().unwrap().push(tx.clone());
        Ok(tx.signatures.first().copied().unwrap_or_else(Signature::new_unique))
    }

    async fn confirm(&self, _signature: &Signature, _blockhash: &Hash, _timeout: Duration) -> Result<Confirmation> {
        let slot = self.slot.load(Ordering::SeqCst);
        Ok(self
            .confirmations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Confirmation::Confirmed { slot }))
    }

    async fn account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let accounts = self.accounts.lock().unwrap();
        Ok(addresses.iter().map(|a| accounts.get(a).cloned()).collect())
    }

    async fn balance(&self, _address: &Pubkey) -> Result<u64> {
        Ok(10_000_000_000)
    }
}

/// Trade-only view of what was broadcast
pub fn trade_transactions(ledger: &FakeLedger) -> Vec<VersionedTransaction> {
    ledger
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|tx| FakeLedger::table_instruction(tx).is_none())
        .cloned()
        .collect()
}

// ============================================================================
// Instructions
// ============================================================================

/// One instruction of `program` touching `accounts` writable non-signer keys.
pub fn swap_instruction(program: Pubkey, accounts: &[Pubkey]) -> Instruction {
    Instruction {
        program_id: program,
        accounts: accounts.iter().map(|k| AccountMeta::new(*k, false)).collect(),
        data: vec![0xA5; 24],
    }
}

pub fn unique_keys(n: usize) -> Vec<Pubkey> {
    (0..n).map(|_| Pubkey::new_unique()).collect()
}

/// A token-account sized `CreateAccount` funded by `payer` for `new_account`.
pub fn create_account_for(payer: &Pubkey, new_account: &Pubkey) -> Instruction {
    system_instruction::create_account(payer, new_account, 2_039_280, 165, &spl_token::id())
}

// ============================================================================
// Edges
// ============================================================================

/// Quotes `amount * num / den`; `den == 0` makes every quote fail.
pub struct FixedRateEdge {
    id: String,
    from: Pubkey,
    to: Pubkey,
    num: u64,
    den: u64,
    program: Pubkey,
    accounts: Vec<Pubkey>,
    tables: Vec<Pubkey>,
    with_throwaway_signer: bool,
    rogue_allocation: bool,
    reject_builds: bool,
    pub builds: AtomicUsize,
}

impl FixedRateEdge {
    pub fn new(id: &str, from: Pubkey, to: Pubkey, num: u64, den: u64) -> Self {
        Self {
            id: id.to_string(),
            from,
            to,
            num,
            den,
            program: Pubkey::new_unique(),
            accounts: unique_keys(4),
            tables: Vec::new(),
            with_throwaway_signer: false,
            rogue_allocation: false,
            reject_builds: false,
            builds: AtomicUsize::new(0),
        }
    }

    /// Number of distinct accounts the swap instruction touches.
    pub fn with_accounts(mut self, n: usize) -> Self {
        self.accounts = unique_keys(n);
        self
    }

    pub fn with_tables(mut self, tables: Vec<Pubkey>) -> Self {
        self.tables = tables;
        self
    }

    /// Prepend a `CreateAccount` for a fresh keypair returned as an extra signer.
    pub fn with_throwaway_signer(mut self) -> Self {
        self.with_throwaway_signer = true;
        self
    }

    /// Prepend a `CreateAccount` for a fresh account nobody can sign for.
    pub fn with_rogue_allocation(mut self) -> Self {
        self.rogue_allocation = true;
        self
    }

    pub fn rejecting_builds(mut self) -> Self {
        self.reject_builds = true;
        self
    }

    pub fn into_ref(self) -> EdgeRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Edge for FixedRateEdge {
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
            bail!("{} is down", self.id);
        }
        Ok((amount_in as u128 * self.num as u128 / self.den as u128) as u64)
    }

    async fn build_swap(&self, amount_in: u64, min_out: u64, payer: &Pubkey) -> Result<SwapBundle> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.reject_builds {
            bail!("venue refused the route");
        }
        let out = self.quote(amount_in).await?;
        if out < min_out {
            bail!("output {} below min_out {}", out, min_out);
        }

        let mut bundle = SwapBundle {
            lookup_tables: self.tables.clone(),
            ..Default::default()
        };
        if self.with_throwaway_signer {
            let kp = Arc::new(Keypair::new());
            bundle.instructions.push(create_account_for(payer, &kp.pubkey()));
            bundle.extra_signers.push(kp);
        }
        if self.rogue_allocation {
            bundle
                .instructions
                .push(create_account_for(payer, &Pubkey::new_unique()));
        }
        let mut accounts = vec![*payer];
        accounts.extend(self.accounts.iter().copied());
        bundle.instructions.push(swap_instruction(self.program, &accounts));
        Ok(bundle)
    }
}

/// Mints A, B, C and the A→B ×1.02, B→C ×0.99, C→A ×1.03 triangle.
pub fn scenario_edges() -> (Vec<EdgeRef>, [Pubkey; 3]) {
    let (a, b, c) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
    let edges = vec![
        FixedRateEdge::new("ab", a, b, 102, 100).into_ref(),
        FixedRateEdge::new("bc", b, c, 99, 100).into_ref(),
        FixedRateEdge::new("ca", c, a, 103, 100).into_ref(),
    ];
    (edges, [a, b, c])
}

// ============================================================================
// Configuration
// ============================================================================

pub fn test_config(mode: RuntimeMode) -> Config {
    Config {
        rpc: RpcConfig {
            url: "http://127.0.0.1:8899".to_string(),
            send_url: None,
            commitment_level: "confirmed".to_string(),
            timeout_seconds: 5,
        },
        wallet: WalletConfig {
            keypair_path: None,
            private_key: None,
            min_balance_sol: 0.0,
        },
        fees: FeeConfig {
            start: 5_000,
            min: 5_000,
            max: 40_000,
            step: 1_000,
            target_inclusion_ratio: 0.3,
        },
        risk: RiskConfig {
            max_consecutive_failures: 3,
            cooldown_ms: 10,
        },
        sizing: SizingConfig {
            ladder: vec![50, 100, 200],
            policy: SizingPolicy::LargestProfitable,
            seed_from_ladder: false,
        },
        routing: RoutingConfig {
            max_hops: 3,
            allow_third_hop: true,
            static_lookup_tables: Vec::new(),
            runtime_lookup_table: None,
        },
        execution: ExecutionConfig {
            mode,
            compute_unit_limit: 400_000,
            simulate_before_send: true,
            halt_on_sim_failure: false,
            confirm_timeout_ms: 1_000,
            tick_delay_ms: 0,
            max_slippage_bps: 0,
            quote_concurrency: 4,
        },
        jupiter: JupiterConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            slippage_bps: 20,
            timeout_ms: 100,
            mints: Vec::new(),
        },
        logging: LoggingConfig {
            json: false,
            log_dir: None,
        },
        metrics: MetricsConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
    }
}
