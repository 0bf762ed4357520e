// Transaction Packer
//
// Turns an ordered instruction list into one broadcastable message:
// 1. Allocation guard: system allocations may only target the payer or approved signers
// 2. Signer sanitize: only payer + approved signers keep `is_signer`
// 3. Compute budget prelude
// 4. Legacy message if it fits the packet ceiling
// 5. Otherwise a v0 message over the self-managed lookup table plus external tables,
//    falling back to legacy when any table is unusable
//
// The self-managed table moves Absent -> PendingCreate -> Active <-> Extending and is
// only ever touched from `pack`, which needs `&mut self`.

use solana_sdk::{
    address_lookup_table::{
        self,
        instruction::{create_lookup_table, extend_lookup_table},
        state::AddressLookupTable,
    },
    address_lookup_table_account::AddressLookupTableAccount,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0, Message, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction::SystemInstruction,
    system_program,
    transaction::VersionedTransaction,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::constants::{LOOKUP_TABLE_EXTEND_CHUNK, LOOKUP_TABLE_MAX_ADDRESSES, PACKET_DATA_SIZE};
use super::ledger::{Confirmation, Ledger};
use crate::error::ArbError;
use crate::utils::RetryPolicy;

/// One packing outcome; exactly one strategy per build
#[derive(Debug, Clone, PartialEq)]
pub enum PackedTransaction {
    /// Legacy message, no table references
    Compact { message: VersionedMessage, size: usize },
    /// v0 message resolving accounts through `tables`
    TableAssisted {
        message: VersionedMessage,
        tables: Vec<Pubkey>,
        size: usize,
    },
}

impl PackedTransaction {
    pub fn message(&self) -> &VersionedMessage {
        match self {
            PackedTransaction::Compact { message, .. }
            | PackedTransaction::TableAssisted { message, .. } => message,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            PackedTransaction::Compact { size, .. } | PackedTransaction::TableAssisted { size, .. } => {
                *size
            }
        }
    }

    pub fn tables(&self) -> &[Pubkey] {
        match self {
            PackedTransaction::Compact { .. } => &[],
            PackedTransaction::TableAssisted { tables, .. } => tables,
        }
    }

    pub fn is_compact(&self) -> bool {
        matches!(self, PackedTransaction::Compact { .. })
    }

    pub fn recent_blockhash(&self) -> Hash {
        *self.message().recent_blockhash()
    }

    /// Sign with exactly the keys the message requires.
    pub fn sign(
        &self,
        payer: &Keypair,
        extra_signers: &[Arc<Keypair>],
    ) -> Result<VersionedTransaction, ArbError> {
        let message = self.message();
        let required = message.header().num_required_signatures as usize;
        let mut signers: Vec<&dyn Signer> = Vec::with_capacity(required);
        for (index, key) in message.static_account_keys().iter().take(required).enumerate() {
            if *key == payer.pubkey() {
                signers.push(payer);
            } else if let Some(kp) = extra_signers.iter().find(|kp| kp.pubkey() == *key) {
                signers.push(kp.as_ref());
            } else {
                return Err(ArbError::SafetyViolation {
                    instruction_index: index,
                    account: *key,
                    kind: "missing signer keypair".to_string(),
                });
            }
        }
        VersionedTransaction::try_new(message.clone(), &signers)
            .map_err(|e| ArbError::Encoding(format!("signing failed: {}", e)))
    }
}

/// Self-managed lookup table lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Absent,
    /// Create was submitted but never confirmed
    PendingCreate { address: Pubkey },
    Active { address: Pubkey },
    Extending { address: Pubkey },
}

impl TableState {
    pub fn address(&self) -> Option<Pubkey> {
        match self {
            TableState::Absent => None,
            TableState::PendingCreate { address }
            | TableState::Active { address }
            | TableState::Extending { address } => Some(*address),
        }
    }
}

/// Reject system allocations whose signing account the caller cannot produce.
pub fn guard_allocations(
    instructions: &[Instruction],
    payer: &Pubkey,
    extra_signers: &[Pubkey],
) -> Result<(), ArbError> {
    let approved = |key: &Pubkey| key == payer || extra_signers.contains(key);

    for (index, ix) in instructions.iter().enumerate() {
        if ix.program_id != system_program::id() {
            continue;
        }
        let Ok(decoded) = bincode::deserialize::<SystemInstruction>(&ix.data) else {
            continue;
        };

        let (kind, signer) = match decoded {
            SystemInstruction::CreateAccount { .. } => ("CreateAccount", account_at(ix, index, 1, "CreateAccount")?),
            SystemInstruction::Allocate { .. } => ("Allocate", account_at(ix, index, 0, "Allocate")?),
            SystemInstruction::CreateAccountWithSeed { base, .. } => ("CreateAccountWithSeed", base),
            SystemInstruction::AllocateWithSeed { base, .. } => ("AllocateWithSeed", base),
            _ => continue,
        };

        if !approved(&signer) {
            warn!(
                "🛑 {} at instruction #{} needs unapproved signer {}",
                kind, index, signer
            );
            return Err(ArbError::SafetyViolation {
                instruction_index: index,
                account: signer,
                kind: kind.to_string(),
            });
        }
    }
    Ok(())
}

fn account_at(ix: &Instruction, index: usize, position: usize, kind: &str) -> Result<Pubkey, ArbError> {
    ix.accounts
        .get(position)
        .map(|meta| meta.pubkey)
        .ok_or_else(|| ArbError::MalformedInstruction {
            instruction_index: index,
            kind: kind.to_string(),
            expected: position + 1,
        })
}

/// Force `is_signer` to exactly `{payer} ∪ extra_signers`; writability is kept.
pub fn sanitize_signers(
    instructions: &[Instruction],
    payer: &Pubkey,
    extra_signers: &[Pubkey],
) -> Vec<Instruction> {
    instructions
        .iter()
        .map(|ix| Instruction {
            program_id: ix.program_id,
            accounts: ix
                .accounts
                .iter()
                .map(|meta| AccountMeta {
                    pubkey: meta.pubkey,
                    is_signer: meta.pubkey == *payer || extra_signers.contains(&meta.pubkey),
                    is_writable: meta.is_writable,
                })
                .collect(),
            data: ix.data.clone(),
        })
        .collect()
}

/// Compute unit limit (skipped when 0) and price ahead of `instructions`.
pub fn with_compute_budget(instructions: Vec<Instruction>, cu_limit: u32, cu_price: u64) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(instructions.len() + 2);
    if cu_limit > 0 {
        out.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
    }
    out.push(ComputeBudgetInstruction::set_compute_unit_price(cu_price));
    out.extend(instructions);
    out
}

/// Non-signer keys referenced by `instructions`, program IDs included, first-seen order.
pub fn lookup_candidates(instructions: &[Instruction], payer: &Pubkey, extra_signers: &[Pubkey]) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for ix in instructions {
        let referenced = std::iter::once(ix.program_id).chain(ix.accounts.iter().map(|m| m.pubkey));
        for key in referenced {
            if key == *payer || extra_signers.contains(&key) {
                continue;
            }
            if seen.insert(key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn unique_key_count(instructions: &[Instruction], payer: &Pubkey) -> usize {
    let mut keys: HashSet<Pubkey> = HashSet::new();
    keys.insert(*payer);
    for ix in instructions {
        keys.insert(ix.program_id);
        keys.extend(ix.accounts.iter().map(|m| m.pubkey));
    }
    keys.len()
}

/// Wire size with one placeholder signature per required signer.
pub fn serialized_size(message: &VersionedMessage) -> Result<usize, ArbError> {
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); message.header().num_required_signatures as usize],
        message: message.clone(),
    };
    bincode::serialized_size(&tx)
        .map(|n| n as usize)
        .map_err(|e| ArbError::Encoding(e.to_string()))
}

/// On-chain view of a lookup table
#[derive(Debug, Clone)]
struct TableSnapshot {
    addresses: Vec<Pubkey>,
    active: bool,
}

fn decode_table(address: &Pubkey, owner: &Pubkey, data: &[u8]) -> Result<TableSnapshot, ArbError> {
    if *owner != address_lookup_table::program::id() {
        return Err(ArbError::TableLifecycle(format!(
            "{} is not a lookup table (owner {})",
            address, owner
        )));
    }
    let table = AddressLookupTable::deserialize(data)
        .map_err(|e| ArbError::TableLifecycle(format!("cannot decode table {}: {:?}", address, e)))?;
    Ok(TableSnapshot {
        addresses: table.addresses.to_vec(),
        active: table.meta.deactivation_slot == u64::MAX,
    })
}

/// Create failures carry the address when the create may have landed anyway
#[derive(Debug)]
struct CreateFailure {
    address: Option<Pubkey>,
    error: ArbError,
}

impl std::fmt::Display for CreateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

fn is_stale_slot(failure: &CreateFailure) -> bool {
    failure.error.to_string().contains("not a recent slot")
}

/// Sign with the payer, dry-run, send, and wait for one table-management instruction.
async fn submit_table_instruction(
    ledger: &dyn Ledger,
    payer: &Keypair,
    ix: Instruction,
    confirm_timeout: Duration,
) -> Result<Signature, ArbError> {
    let ledger_err = |e: anyhow::Error| ArbError::TableLifecycle(format!("{:#}", e));

    let blockhash = ledger.latest_blockhash().await.map_err(ledger_err)?;
    let message = Message::new_with_blockhash(&[ix], Some(&payer.pubkey()), &blockhash);
    let tx = VersionedTransaction::try_new(VersionedMessage::Legacy(message), &[payer])
        .map_err(|e| ArbError::TableLifecycle(format!("signing failed: {}", e)))?;

    let simulation = ledger.simulate(&tx).await.map_err(ledger_err)?;
    if let Some(error) = simulation.error {
        let detail: Vec<&str> = simulation
            .logs
            .iter()
            .filter(|l| l.contains("Program log") || l.contains("recent slot"))
            .map(String::as_str)
            .collect();
        return Err(ArbError::TableLifecycle(format!("{} {}", error, detail.join(" | "))));
    }

    let signature = ledger.send_raw(&tx).await.map_err(ledger_err)?;
    match ledger
        .confirm(&signature, &blockhash, confirm_timeout)
        .await
        .map_err(ledger_err)?
    {
        Confirmation::Confirmed { .. } => Ok(signature),
        Confirmation::Failed(reason) => Err(ArbError::TableLifecycle(format!(
            "table transaction {} failed: {}",
            signature, reason
        ))),
        Confirmation::TimedOut => Err(ArbError::TableLifecycle(format!(
            "table transaction {} not confirmed in {:?}",
            signature, confirm_timeout
        ))),
    }
}

async fn create_once(
    ledger: &dyn Ledger,
    payer: &Keypair,
    confirm_timeout: Duration,
) -> Result<Pubkey, CreateFailure> {
    let slot = ledger.slot().await.map_err(|e| CreateFailure {
        address: None,
        error: ArbError::TableLifecycle(format!("{:#}", e)),
    })?;
    let (ix, address) = create_lookup_table(payer.pubkey(), payer.pubkey(), slot);
    debug!("creating lookup table {} at slot {}", address, slot);

    submit_table_instruction(ledger, payer, ix, confirm_timeout)
        .await
        .map(|_| address)
        .map_err(|error| CreateFailure {
            address: Some(address),
            error,
        })
}

pub struct TransactionPacker {
    ledger: Arc<dyn Ledger>,
    payer: Arc<Keypair>,
    table: TableState,
    retry: RetryPolicy,
    confirm_timeout: Duration,
    size_limit: usize,
}

impl TransactionPacker {
    pub fn new(ledger: Arc<dyn Ledger>, payer: Arc<Keypair>) -> Self {
        Self {
            ledger,
            payer,
            table: TableState::Absent,
            retry: RetryPolicy::new(3),
            confirm_timeout: Duration::from_secs(30),
            size_limit: PACKET_DATA_SIZE,
        }
    }

    /// Adopt an existing self-managed table.
    pub fn with_runtime_table(mut self, address: Option<Pubkey>) -> Self {
        if let Some(address) = address {
            self.table = TableState::Active { address };
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn table_state(&self) -> TableState {
        self.table
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub async fn pack(
        &mut self,
        instructions: &[Instruction],
        cu_limit: u32,
        cu_price: u64,
        extra_signers: &[Pubkey],
        external_tables: &[Pubkey],
    ) -> Result<PackedTransaction, ArbError> {
        let payer = self.payer.pubkey();

        guard_allocations(instructions, &payer, extra_signers)?;
        let sanitized = sanitize_signers(instructions, &payer, extra_signers);
        let full = with_compute_budget(sanitized, cu_limit, cu_price);

        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(|e| ArbError::Ledger(format!("{:#}", e)))?;

        if let Some(packed) = self.try_compact(&full, &payer, blockhash)? {
            debug!("📦 compact encoding, {} bytes", packed.size());
            return Ok(packed);
        }

        match self
            .table_assisted(&full, &payer, extra_signers, external_tables, blockhash)
            .await
        {
            Ok(packed) => {
                info!(
                    "📦 table-assisted encoding, {} bytes via {} table(s)",
                    packed.size(),
                    packed.tables().len()
                );
                Ok(packed)
            }
            Err(ArbError::TableLifecycle(reason)) => {
                warn!("lookup tables unusable ({}), recompiling legacy", reason);
                self.legacy(&full, &payer, blockhash)
            }
            Err(e) => Err(e),
        }
    }

    fn try_compact(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        blockhash: Hash,
    ) -> Result<Option<PackedTransaction>, ArbError> {
        match self.legacy(instructions, payer, blockhash) {
            Ok(packed) => Ok(Some(packed)),
            Err(ArbError::Oversized { size, limit }) => {
                debug!("legacy encoding {} bytes exceeds {}", size, limit);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn legacy(&self, instructions: &[Instruction], payer: &Pubkey, blockhash: Hash) -> Result<PackedTransaction, ArbError> {
        let keys = unique_key_count(instructions, payer);
        if keys > u8::MAX as usize {
            return Err(ArbError::Oversized {
                size: keys * 32,
                limit: self.size_limit,
            });
        }
        let message = VersionedMessage::Legacy(Message::new_with_blockhash(instructions, Some(payer), &blockhash));
        let size = serialized_size(&message)?;
        if size > self.size_limit {
            return Err(ArbError::Oversized {
                size,
                limit: self.size_limit,
            });
        }
        Ok(PackedTransaction::Compact { message, size })
    }

    async fn table_assisted(
        &mut self,
        instructions: &[Instruction],
        payer: &Pubkey,
        extra_signers: &[Pubkey],
        external_tables: &[Pubkey],
        blockhash: Hash,
    ) -> Result<PackedTransaction, ArbError> {
        let keys = lookup_candidates(instructions, payer, extra_signers);
        let runtime = self.ensure_runtime_table(&keys).await?;

        let mut addresses = vec![runtime];
        for table in external_tables {
            if !addresses.contains(table) {
                addresses.push(*table);
            }
        }

        let accounts = self
            .ledger
            .multiple_accounts(&addresses)
            .await
            .map_err(|e| ArbError::TableLifecycle(format!("{:#}", e)))?;

        let mut lookups = Vec::with_capacity(addresses.len());
        for (address, account) in addresses.iter().zip(accounts.into_iter()) {
            let role = if *address == runtime { "runtime" } else { "external" };
            let account = account.ok_or_else(|| {
                ArbError::TableLifecycle(format!("{} table {} not found", role, address))
            })?;
            let snapshot = decode_table(address, &account.owner, &account.data)?;
            if !snapshot.active {
                return Err(ArbError::TableLifecycle(format!("{} table {} is deactivated", role, address)));
            }
            lookups.push(AddressLookupTableAccount {
                key: *address,
                addresses: snapshot.addresses,
            });
        }

        let compiled = v0::Message::try_compile(payer, instructions, &lookups, blockhash)
            .map_err(|e| ArbError::Encoding(format!("v0 compile failed: {}", e)))?;
        let tables: Vec<Pubkey> = compiled
            .address_table_lookups
            .iter()
            .map(|lookup| lookup.account_key)
            .collect();
        let message = VersionedMessage::V0(compiled);
        let size = serialized_size(&message)?;
        if size > self.size_limit {
            return Err(ArbError::Oversized {
                size,
                limit: self.size_limit,
            });
        }
        Ok(PackedTransaction::TableAssisted { message, tables, size })
    }

    /// Make sure the self-managed table holds `keys`, creating or extending it as needed.
    async fn ensure_runtime_table(&mut self, keys: &[Pubkey]) -> Result<Pubkey, ArbError> {
        let address = match self.table {
            TableState::Absent => self.create_table().await?,
            TableState::PendingCreate { address } => match self.fetch_table(&address).await? {
                Some(_) => {
                    info!("adopting lookup table {} from an unconfirmed create", address);
                    address
                }
                None => {
                    self.table = TableState::Absent;
                    self.create_table().await?
                }
            },
            TableState::Active { address } | TableState::Extending { address } => address,
        };
        self.table = TableState::Active { address };

        let Some(snapshot) = self.fetch_table(&address).await? else {
            // Probe again on the next call
            self.table = TableState::PendingCreate { address };
            return Err(ArbError::TableLifecycle(format!("table {} not found", address)));
        };
        if !snapshot.active {
            return Err(ArbError::TableLifecycle(format!("runtime table {} is deactivated", address)));
        }

        let present: HashSet<Pubkey> = snapshot.addresses.iter().copied().collect();
        let missing: Vec<Pubkey> = keys.iter().filter(|k| !present.contains(k)).copied().collect();
        if missing.is_empty() {
            return Ok(address);
        }
        if present.len() + missing.len() > LOOKUP_TABLE_MAX_ADDRESSES {
            return Err(ArbError::TableLifecycle(format!(
                "table {} holds {} addresses, cannot add {}",
                address,
                present.len(),
                missing.len()
            )));
        }

        self.table = TableState::Extending { address };
        for chunk in missing.chunks(LOOKUP_TABLE_EXTEND_CHUNK) {
            let ix = extend_lookup_table(address, self.payer.pubkey(), Some(self.payer.pubkey()), chunk.to_vec());
            let submitted =
                submit_table_instruction(self.ledger.as_ref(), &self.payer, ix, self.confirm_timeout).await;
            let signature = match submitted {
                Ok(signature) => signature,
                Err(e) => {
                    // Earlier chunks stay on chain; the next call re-reads and extends the rest
                    self.table = TableState::Active { address };
                    return Err(e);
                }
            };
            debug!("extended {} with {} keys ({})", address, chunk.len(), signature);
        }
        self.table = TableState::Active { address };
        info!("🗂️  lookup table {} extended by {} keys", address, missing.len());
        Ok(address)
    }

    async fn create_table(&mut self) -> Result<Pubkey, ArbError> {
        let ledger = self.ledger.as_ref();
        let payer = self.payer.as_ref();
        let confirm_timeout = self.confirm_timeout;

        let result = self
            .retry
            .retry_async_when(|| create_once(ledger, payer, confirm_timeout), is_stale_slot)
            .await;

        match result {
            Ok(address) => {
                info!("🗂️  created lookup table {}", address);
                self.table = TableState::Active { address };
                Ok(address)
            }
            Err(CreateFailure { address, error }) => {
                self.table = match address {
                    Some(address) => TableState::PendingCreate { address },
                    None => TableState::Absent,
                };
                Err(error)
            }
        }
    }

    async fn fetch_table(&self, address: &Pubkey) -> Result<Option<TableSnapshot>, ArbError> {
        let account = self
            .ledger
            .account(address)
            .await
            .map_err(|e| ArbError::TableLifecycle(format!("{:#}", e)))?;
        match account {
            Some(account) => decode_table(address, &account.owner, &account.data).map(Some),
            None => Ok(None),
        }
    }
}
