// Swap edge capability
//
// One directed hop through one venue. The core only sees this trait; venue
// SDK quirks and version skew stay inside each implementation.

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Keypair};
use std::sync::Arc;

/// Instructions and signing requirements for one hop
#[derive(Default)]
pub struct SwapBundle {
    pub instructions: Vec<Instruction>,
    /// Throwaway keypairs the hop's instructions must be signed with
    pub extra_signers: Vec<Arc<Keypair>>,
    /// Lookup tables the venue recommends for these instructions
    pub lookup_tables: Vec<Pubkey>,
}

impl std::fmt::Debug for SwapBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapBundle")
            .field("instructions", &self.instructions.len())
            .field("extra_signers", &self.extra_signers.len())
            .field("lookup_tables", &self.lookup_tables)
            .finish()
    }
}

#[async_trait]
pub trait Edge: Send + Sync {
    fn id(&self) -> &str;

    fn from_mint(&self) -> Pubkey;

    fn to_mint(&self) -> Pubkey;

    /// Informational venue fee in basis points.
    fn fee_bps(&self) -> u16 {
        0
    }

    /// Output estimate for `amount_in`. `Ok(0)` means the hop cannot be routed;
    /// `Err` is reserved for exceptional conditions.
    async fn quote(&self, amount_in: u64) -> Result<u64>;

    /// Instructions swapping `amount_in` that revert unless at least `min_out` arrives.
    async fn build_swap(&self, amount_in: u64, min_out: u64, payer: &Pubkey) -> Result<SwapBundle>;
}

pub type EdgeRef = Arc<dyn Edge>;

/// Short label used in logs: `id(from..->to..)`.
pub fn describe(edge: &dyn Edge) -> String {
    format!(
        "{}({}->{})",
        edge.id(),
        short_key(&edge.from_mint()),
        short_key(&edge.to_mint())
    )
}

pub fn short_key(key: &Pubkey) -> String {
    let s = key.to_string();
    format!("{}..", &s[..s.len().min(4)])
}
