use anyhow::{bail, Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::chain::constants::{canonical_mint, USDC_MINT, USDT_MINT, WSOL_MINT};
use crate::dex::sizing::SizingPolicy;

/// Main configuration struct containing all bot settings
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub fees: FeeConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub routing: RoutingConfig,
    pub execution: ExecutionConfig,
    pub jupiter: JupiterConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// RPC endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Reads: accounts, slots, balances
    pub url: String,
    /// Blockhash, simulate, send and confirm; falls back to `url`
    pub send_url: Option<String>,
    pub commitment_level: String,
    pub timeout_seconds: u64,
}

/// Wallet configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub keypair_path: Option<String>,
    pub private_key: Option<String>,
    pub min_balance_sol: f64,
}

/// Priority fee controller bounds (micro-lamports per compute unit)
#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    pub start: u64,
    pub min: u64,
    pub max: u64,
    pub step: u64,
    pub target_inclusion_ratio: f64,
}

/// Consecutive-failure circuit breaker
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub max_consecutive_failures: u32,
    pub cooldown_ms: u64,
}

impl RiskConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Trade size ladder and selection policy
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Candidate sizes in base units, ascending, deduplicated
    pub ladder: Vec<u64>,
    pub policy: SizingPolicy,
    /// Use the smallest rung as the discovery seed instead of 1% of a unit
    pub seed_from_ladder: bool,
}

/// Hop policy and lookup tables
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub max_hops: u32,
    pub allow_third_hop: bool,
    /// Pre-registered tables attached to every pack
    pub static_lookup_tables: Vec<Pubkey>,
    /// Existing self-managed table to adopt instead of creating a new one
    pub runtime_lookup_table: Option<Pubkey>,
}

impl RoutingConfig {
    /// Whether a path of `hops` legs may be executed.
    pub fn allows_hops(&self, hops: usize) -> bool {
        if hops <= self.max_hops as usize {
            return true;
        }
        hops == 3 && self.allow_third_hop && !self.static_lookup_tables.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Simulate only, never broadcast
    Simulate,
    /// Broadcast and confirm
    Live,
}

impl FromStr for RuntimeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulate" | "sim" | "dry-run" => Ok(RuntimeMode::Simulate),
            "live" => Ok(RuntimeMode::Live),
            other => bail!("unknown runtime mode '{}', expected simulate|live", other),
        }
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Simulate => write!(f, "simulate"),
            RuntimeMode::Live => write!(f, "live"),
        }
    }
}

/// Transaction execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub mode: RuntimeMode,
    pub compute_unit_limit: u32,
    pub simulate_before_send: bool,
    pub halt_on_sim_failure: bool,
    pub confirm_timeout_ms: u64,
    pub tick_delay_ms: u64,
    pub max_slippage_bps: u64,
    pub quote_concurrency: usize,
}

impl ExecutionConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn tick_delay(&self) -> Duration {
        Duration::from_millis(self.tick_delay_ms)
    }
}

/// Jupiter-backed edges
#[derive(Debug, Clone)]
pub struct JupiterConfig {
    pub base_url: String,
    pub slippage_bps: u16,
    pub timeout_ms: u64,
    pub mints: Vec<Pubkey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub json: bool,
    pub log_dir: Option<String>,
}

/// Prometheus `/metrics` listener; port 0 disables it
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,
}

impl MetricsConfig {
    pub fn enabled(&self) -> bool {
        self.port != 0
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from an explicit env file, then the process environment
    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to read env file {}", path.display()))?;
        Self::from_env()
    }

    /// Build configuration from the current process environment
    pub fn from_env() -> Result<Self> {
        let rpc = RpcConfig {
            url: std::env::var("RPC_URL")
                .or_else(|_| std::env::var("RPC_URL_READ"))
                .context("RPC_URL (or RPC_URL_READ) not set")?,
            send_url: std::env::var("RPC_URL_SEND").ok().filter(|s| !s.trim().is_empty()),
            commitment_level: get_env_or_default("COMMITMENT_LEVEL", "confirmed"),
            timeout_seconds: get_u64_env("RPC_TIMEOUT_SECONDS", 30)?,
        };

        let wallet = WalletConfig {
            keypair_path: std::env::var("WALLET_KEYPAIR_PATH").ok(),
            private_key: std::env::var("WALLET_PRIVATE_KEY").ok(),
            min_balance_sol: get_f64_env("MIN_BALANCE_SOL", 0.05)?,
        };

        let fee_min = get_u64_env("PRIORITY_FEE_MIN", 5_000)?;
        let fees = FeeConfig {
            start: get_u64_env("PRIORITY_FEE_START", fee_min)?,
            min: fee_min,
            max: get_u64_env("PRIORITY_FEE_MAX", 40_000)?,
            step: get_u64_env("PRIORITY_FEE_STEP", 1_000)?,
            target_inclusion_ratio: get_f64_env("TARGET_INCLUSION_RATIO", 0.3)?,
        };

        let risk = RiskConfig {
            max_consecutive_failures: get_u32_env("MAX_CONSECUTIVE_FAILURES", 5)?,
            cooldown_ms: get_u64_env("COOLDOWN_MS", 5_000)?,
        };

        let ladder_decimals = match std::env::var("SIZE_LADDER_DECIMALS") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<u32>()
                    .context("Failed to parse SIZE_LADDER_DECIMALS as u32")?,
            ),
            Err(_) => None,
        };
        let sizing = SizingConfig {
            ladder: parse_ladder(
                &get_env_or_default("SIZE_LADDER", "1000000,2000000,5000000"),
                ladder_decimals,
            )?,
            policy: get_env_or_default("SIZING_POLICY", "largest").parse()?,
            seed_from_ladder: get_bool_env("SEED_FROM_LADDER", false),
        };

        let routing = RoutingConfig {
            max_hops: get_u32_env("MAX_HOPS", 2)?,
            allow_third_hop: get_bool_env("ALLOW_THIRD_HOP", true),
            static_lookup_tables: parse_pubkey_list(&get_env_or_default("LUT_ADDRESSES", ""))?,
            runtime_lookup_table: parse_pubkey_optional("LUT_ADDRESS")?,
        };

        let execution = ExecutionConfig {
            mode: get_env_or_default("RUNTIME_MODE", "simulate").parse()?,
            compute_unit_limit: get_u32_env("COMPUTE_UNIT_LIMIT", 1_400_000)?,
            simulate_before_send: get_bool_env("SIMULATE_BEFORE_SEND", true),
            halt_on_sim_failure: get_bool_env("HALT_ON_SIM_FAILURE", false),
            confirm_timeout_ms: get_u64_env("CONFIRM_TIMEOUT_MS", 30_000)?,
            tick_delay_ms: get_u64_env("TICK_DELAY_MS", 350)?,
            max_slippage_bps: get_u64_env("MAX_SLIPPAGE_BPS", 0)?,
            quote_concurrency: get_u32_env("QUOTE_CONCURRENCY", 8)? as usize,
        };

        let mut mints = parse_pubkey_list(&get_env_or_default("ARB_MINTS", ""))?;
        if mints.is_empty() {
            mints = vec![WSOL_MINT, USDC_MINT, USDT_MINT];
        }
        let jupiter = JupiterConfig {
            base_url: get_env_or_default("JUPITER_BASE_URL", "https://public.jupiterapi.com"),
            slippage_bps: get_u16_env("JUPITER_SLIPPAGE_BPS", 20)?,
            timeout_ms: get_u64_env("JUPITER_TIMEOUT_MS", 5_000)?,
            mints: dedup_mints(mints),
        };

        let logging = LoggingConfig {
            json: get_bool_env("LOG_JSON", false),
            log_dir: std::env::var("LOG_DIR").ok().filter(|s| !s.trim().is_empty()),
        };

        let metrics = MetricsConfig {
            host: get_env_or_default("METRICS_HOST", "0.0.0.0"),
            port: get_u16_env("METRICS_PORT", 9102)?,
        };

        let config = Config {
            rpc,
            wallet,
            fees,
            risk,
            sizing,
            routing,
            execution,
            jupiter,
            logging,
            metrics,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controllers cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.fees.min > self.fees.max {
            bail!(
                "PRIORITY_FEE_MIN ({}) exceeds PRIORITY_FEE_MAX ({})",
                self.fees.min,
                self.fees.max
            );
        }
        if self.fees.start < self.fees.min || self.fees.start > self.fees.max {
            bail!(
                "PRIORITY_FEE_START ({}) must lie within [{}, {}]",
                self.fees.start,
                self.fees.min,
                self.fees.max
            );
        }
        if !(0.0..=1.0).contains(&self.fees.target_inclusion_ratio) {
            bail!(
                "TARGET_INCLUSION_RATIO must be within [0, 1], got {}",
                self.fees.target_inclusion_ratio
            );
        }
        if self.risk.max_consecutive_failures == 0 {
            bail!("MAX_CONSECUTIVE_FAILURES must be at least 1");
        }
        if self.sizing.ladder.is_empty() {
            bail!("SIZE_LADDER must contain at least one non-zero size");
        }
        if self.routing.max_hops == 0 {
            bail!("MAX_HOPS must be at least 1");
        }
        if self.execution.quote_concurrency == 0 {
            bail!("QUOTE_CONCURRENCY must be at least 1");
        }
        Ok(())
    }
}

// ============================================================================
// Helper Functions for Environment Variable Parsing
// ============================================================================

/// Get environment variable or return default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get boolean environment variable with default
fn get_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or(default)
}

/// Get u16 environment variable with default
fn get_u16_env(key: &str, default: u16) -> Result<u16> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {} as u16", key))
}

/// Get u32 environment variable with default
fn get_u32_env(key: &str, default: u32) -> Result<u32> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {} as u32", key))
}

/// Get u64 environment variable with default
fn get_u64_env(key: &str, default: u64) -> Result<u64> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {} as u64", key))
}

/// Get f64 environment variable with default
fn get_f64_env(key: &str, default: f64) -> Result<f64> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {} as f64", key))
}

/// Parse optional pubkey from environment variable
fn parse_pubkey_optional(env_var: &str) -> Result<Option<Pubkey>> {
    match std::env::var(env_var) {
        Ok(raw) if !raw.trim().is_empty() => Pubkey::from_str(raw.trim())
            .map(Some)
            .with_context(|| format!("Failed to parse {} as Pubkey", env_var)),
        _ => Ok(None),
    }
}

/// Parse comma-separated list of pubkeys
fn parse_pubkey_list(input: &str) -> Result<Vec<Pubkey>> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| Pubkey::from_str(s).with_context(|| format!("Failed to parse '{}' as Pubkey", s)))
        .collect()
}

/// Canonicalise and dedup a mint list, preserving order
fn dedup_mints(mints: Vec<Pubkey>) -> Vec<Pubkey> {
    let mut out: Vec<Pubkey> = Vec::with_capacity(mints.len());
    for mint in mints.into_iter().map(canonical_mint) {
        if !out.contains(&mint) {
            out.push(mint);
        }
    }
    out
}

/// Parse a size ladder. With `decimals`, entries are whole-token amounts ("0.5,1.25").
pub fn parse_ladder(input: &str, decimals: Option<u32>) -> Result<Vec<u64>> {
    let mut ladder = Vec::new();
    for raw in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let amount = match decimals {
            Some(decimals) => {
                let value = Decimal::from_str(raw)
                    .with_context(|| format!("Failed to parse ladder rung '{}'", raw))?;
                let scale = 10u64
                    .checked_pow(decimals)
                    .with_context(|| format!("SIZE_LADDER_DECIMALS {} is too large", decimals))?;
                value
                    .checked_mul(Decimal::from(scale))
                    .with_context(|| format!("Ladder rung '{}' overflows at {} decimals", raw, decimals))?
                    .trunc()
                    .to_u64()
                    .with_context(|| format!("Ladder rung '{}' does not fit in u64", raw))?
            }
            None => raw
                .parse::<u64>()
                .with_context(|| format!("Failed to parse ladder rung '{}' as u64", raw))?,
        };
        if amount > 0 {
            ladder.push(amount);
        }
    }
    ladder.sort_unstable();
    ladder.dedup();
    Ok(ladder)
}
