// Jupiter aggregator edge
//
// Quotes through `GET /quote` and builds hop instructions through
// `POST /swap-instructions`. Jupiter's compute-budget instructions are dropped;
// the packer prepends its own.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::edge::{short_key, Edge, EdgeRef, SwapBundle};
use crate::chain::constants::canonical_mint;
use crate::config::JupiterConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAccountMeta {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInstruction {
    program_id: String,
    accounts: Vec<ApiAccountMeta>,
    data: String,
}

impl ApiInstruction {
    fn to_instruction(&self) -> Result<Instruction> {
        let program_id = Pubkey::from_str(&self.program_id)
            .with_context(|| format!("invalid program id {}", self.program_id))?;
        let accounts = self
            .accounts
            .iter()
            .map(|meta| {
                let pubkey = Pubkey::from_str(&meta.pubkey)
                    .with_context(|| format!("invalid account {}", meta.pubkey))?;
                Ok(if meta.is_writable {
                    AccountMeta::new(pubkey, meta.is_signer)
                } else {
                    AccountMeta::new_readonly(pubkey, meta.is_signer)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let data = STANDARD
            .decode(&self.data)
            .context("instruction data is not valid base64")?;
        Ok(Instruction {
            program_id,
            accounts,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsResponse {
    #[serde(default)]
    compute_budget_instructions: Vec<ApiInstruction>,
    #[serde(default)]
    setup_instructions: Vec<ApiInstruction>,
    swap_instruction: ApiInstruction,
    cleanup_instruction: Option<ApiInstruction>,
    #[serde(default)]
    address_lookup_table_addresses: Vec<String>,
}

impl SwapInstructionsResponse {
    fn into_bundle(self) -> Result<SwapBundle> {
        if !self.compute_budget_instructions.is_empty() {
            debug!(
                "dropping {} venue compute budget instructions",
                self.compute_budget_instructions.len()
            );
        }
        let mut instructions = Vec::with_capacity(self.setup_instructions.len() + 2);
        for ix in &self.setup_instructions {
            instructions.push(ix.to_instruction()?);
        }
        instructions.push(self.swap_instruction.to_instruction()?);
        if let Some(cleanup) = &self.cleanup_instruction {
            instructions.push(cleanup.to_instruction()?);
        }
        let lookup_tables = self
            .address_lookup_table_addresses
            .iter()
            .map(|s| Pubkey::from_str(s).with_context(|| format!("invalid lookup table {}", s)))
            .collect::<Result<Vec<_>>>()?;
        Ok(SwapBundle {
            instructions,
            extra_signers: Vec::new(),
            lookup_tables,
        })
    }
}

/// Largest slippage (bps) that still guarantees `min_out` for a `quoted` output,
/// capped at `configured`.
pub fn slippage_for_min_out(quoted: u64, min_out: u64, configured: u16) -> Option<u16> {
    if quoted == 0 || quoted < min_out {
        return None;
    }
    let headroom = (quoted - min_out) as u128 * 10_000 / quoted as u128;
    Some(headroom.min(configured as u128) as u16)
}

fn parse_amount(value: &Value, field: &str) -> Result<u64> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("quote response missing {}", field))?
        .parse::<u64>()
        .with_context(|| format!("quote field {} is not an integer", field))
}

pub struct JupiterEdge {
    id: String,
    from: Pubkey,
    to: Pubkey,
    base_url: String,
    slippage_bps: u16,
    http: reqwest::Client,
}

impl JupiterEdge {
    pub fn new(http: reqwest::Client, base_url: &str, from: Pubkey, to: Pubkey, slippage_bps: u16) -> Self {
        let from = canonical_mint(from);
        let to = canonical_mint(to);
        Self {
            id: format!("jupiter:{}->{}", short_key(&from), short_key(&to)),
            from,
            to,
            base_url: base_url.trim_end_matches('/').to_string(),
            slippage_bps,
            http,
        }
    }

    /// One edge per ordered pair of distinct mints.
    pub fn for_mints(config: &JupiterConfig) -> Result<Vec<EdgeRef>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        let mut edges: Vec<EdgeRef> = Vec::new();
        for from in &config.mints {
            for to in &config.mints {
                if from == to {
                    continue;
                }
                edges.push(Arc::new(JupiterEdge::new(
                    http.clone(),
                    &config.base_url,
                    *from,
                    *to,
                    config.slippage_bps,
                )));
            }
        }
        Ok(edges)
    }

    async fn fetch_quote(&self, amount_in: u64, slippage_bps: u16) -> Result<Value> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", self.from.to_string()),
                ("outputMint", self.to.to_string()),
                ("amount", amount_in.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("quote HTTP {}: {}", status, body);
        }
        response.json::<Value>().await.context("quote response is not JSON")
    }
}

#[async_trait]
impl Edge for JupiterEdge {
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
        if amount_in == 0 {
            return Ok(0);
        }
        match self.fetch_quote(amount_in, self.slippage_bps).await {
            Ok(quote) => Ok(parse_amount(&quote, "outAmount").unwrap_or(0)),
            Err(e) => {
                debug!("{} unroutable at {}: {:#}", self.id, amount_in, e);
                Ok(0)
            }
        }
    }

    async fn build_swap(&self, amount_in: u64, min_out: u64, payer: &Pubkey) -> Result<SwapBundle> {
        if min_out == 0 {
            bail!("min_out must be positive");
        }

        let mut quote = self.fetch_quote(amount_in, self.slippage_bps).await?;
        let quoted = parse_amount(&quote, "outAmount")?;
        let slippage = slippage_for_min_out(quoted, min_out, self.slippage_bps)
            .ok_or_else(|| anyhow!("quote {} below required min_out {}", quoted, min_out))?;

        if slippage != self.slippage_bps {
            quote = self.fetch_quote(amount_in, slippage).await?;
        }
        let threshold = parse_amount(&quote, "otherAmountThreshold")?;
        if threshold < min_out {
            bail!("route threshold {} below required min_out {}", threshold, min_out);
        }

        let url = format!("{}/swap-instructions", self.base_url);
        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": payer.to_string(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": false,
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("{} swap-instructions HTTP {}: {}", self.id, status, text);
            bail!("swap-instructions HTTP {}", status);
        }

        let parsed: SwapInstructionsResponse = response
            .json()
            .await
            .context("swap-instructions response has unexpected shape")?;
        parsed.into_bundle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::constants::{NATIVE_MINT_PLACEHOLDER, USDC_MINT, WSOL_MINT};

    #[test]
    fn test_slippage_for_min_out() {
        assert_eq!(slippage_for_min_out(10_000, 10_000, 50), Some(0));
        assert_eq!(slippage_for_min_out(10_000, 9_990, 50), Some(10));
        assert_eq!(slippage_for_min_out(10_000, 9_000, 50), Some(50));
        assert_eq!(slippage_for_min_out(9_999, 10_000, 50), None);
        assert_eq!(slippage_for_min_out(0, 0, 50), None);
    }

    #[test]
    fn test_swap_instructions_response_parsing() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let table = Pubkey::new_unique();
        let raw = json!({
            "computeBudgetInstructions": [{
                "programId": solana_sdk::compute_budget::id().to_string(),
                "accounts": [],
                "data": "AsBcFQA="
            }],
            "setupInstructions": [{
                "programId": program.to_string(),
                "accounts": [{"pubkey": payer.to_string(), "isSigner": true, "isWritable": true}],
                "data": STANDARD.encode([1u8, 2, 3])
            }],
            "swapInstruction": {
                "programId": program.to_string(),
                "accounts": [{"pubkey": payer.to_string(), "isSigner": false, "isWritable": false}],
                "data": STANDARD.encode([9u8])
            },
            "cleanupInstruction": null,
            "addressLookupTableAddresses": [table.to_string()]
        });

        let parsed: SwapInstructionsResponse = serde_json::from_value(raw).unwrap();
        let bundle = parsed.into_bundle().unwrap();

        assert_eq!(bundle.instructions.len(), 2);
        assert_eq!(bundle.instructions[0].data, vec![1, 2, 3]);
        assert!(bundle.instructions[0].accounts[0].is_signer);
        assert!(!bundle.instructions[1].accounts[0].is_writable);
        assert_eq!(bundle.lookup_tables, vec![table]);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let ix = ApiInstruction {
            program_id: Pubkey::new_unique().to_string(),
            accounts: vec![],
            data: "%%%".to_string(),
        };
        assert!(ix.to_instruction().is_err());
    }

    #[test]
    fn test_edges_for_every_ordered_pair() {
        let config = JupiterConfig {
            base_url: "https://example.invalid/".to_string(),
            slippage_bps: 20,
            timeout_ms: 1_000,
            mints: vec![WSOL_MINT, USDC_MINT, Pubkey::new_unique()],
        };
        let edges = JupiterEdge::for_mints(&config).unwrap();
        assert_eq!(edges.len(), 6);
        assert!(edges.iter().all(|e| e.from_mint() != e.to_mint()));
    }

    #[test]
    fn test_native_mint_canonicalised() {
        let edge = JupiterEdge::new(
            reqwest::Client::new(),
            "https://example.invalid",
            NATIVE_MINT_PLACEHOLDER,
            USDC_MINT,
            20,
        );
        assert_eq!(edge.from_mint(), WSOL_MINT);
        assert!(edge.id().starts_with("jupiter:"));
    }
}
