use anyhow::{Context, Result};
use clap::Parser;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair},
    signer::Signer,
};
use solana_tri_arb::{
    chain::{Ledger, Orchestrator, RpcLedger},
    config::{Config, LoggingConfig, RuntimeMode, WalletConfig},
    dex::JupiterEdge,
    metrics::Metrics,
};
use spl_associated_token_account::get_associated_token_address;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Triangular arbitrage engine for Solana")]
struct Args {
    /// Runtime mode: simulate (never broadcast) or live. Overrides RUNTIME_MODE.
    #[arg(long)]
    mode: Option<RuntimeMode>,

    /// Env file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ========================================================================
    // Step 1: Load configuration (before logging, which it configures)
    // ========================================================================
    let mut config = match &args.env_file {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(mode) = args.mode {
        config.execution.mode = mode;
    }

    // ========================================================================
    // Step 2: Initialize tracing subscriber with EnvFilter
    // ========================================================================
    let _log_guard = init_tracing(&config.logging)?;

    info!("🚀 Starting Solana triangular arbitrage engine...");
    info!("✅ Configuration loaded successfully");
    debug!(
        "Fees: start={} min={} max={} step={} target={:.2}",
        config.fees.start, config.fees.min, config.fees.max, config.fees.step, config.fees.target_inclusion_ratio
    );
    debug!("Ladder: {:?} ({:?})", config.sizing.ladder, config.sizing.policy);

    // ========================================================================
    // Step 3: Initialize Keypair and derive wallet address
    // ========================================================================
    let payer = Arc::new(load_keypair(&config.wallet)?);
    let wallet_address = payer.pubkey();
    info!("✅ Wallet loaded: {}", wallet_address);

    // ========================================================================
    // Step 4: Initialize RpcClient and the ledger adapter
    // ========================================================================
    let rpc_client = Arc::new(RpcClient::new_with_timeout(
        config.rpc.url.clone(),
        Duration::from_secs(config.rpc.timeout_seconds),
    ));
    let mut rpc_ledger = RpcLedger::new(rpc_client, &config.rpc.commitment_level)?;
    if let Some(send_url) = &config.rpc.send_url {
        rpc_ledger = rpc_ledger.with_send_client(Arc::new(RpcClient::new_with_timeout(
            send_url.clone(),
            Duration::from_secs(config.rpc.timeout_seconds),
        )));
    }
    let ledger: Arc<dyn Ledger> = Arc::new(rpc_ledger);
    info!("✅ RPC client initialized");
    info!("   RPC (read): {}", config.rpc.url);
    info!("   RPC (send): {}", config.rpc.send_url.as_deref().unwrap_or("same as read"));
    info!("   Commitment: {}", config.rpc.commitment_level);

    // ========================================================================
    // Step 5: Provisioning checks (warn only)
    // ========================================================================
    check_balance(ledger.as_ref(), &wallet_address, config.wallet.min_balance_sol).await;
    check_token_accounts(ledger.as_ref(), &wallet_address, &config.jupiter.mints).await;

    // ========================================================================
    // Step 6: Edges, metrics, orchestrator
    // ========================================================================
    let edges = JupiterEdge::for_mints(&config.jupiter)?;
    info!(
        "✅ {} Jupiter edges over {} mints ({})",
        edges.len(),
        config.jupiter.mints.len(),
        config.jupiter.base_url
    );
    let metrics = Metrics::new()?;
    let cancel = CancellationToken::new();
    let metrics_server = if config.metrics.enabled() {
        let addr: SocketAddr = format!("{}:{}", config.metrics.host, config.metrics.port)
            .parse()
            .context("Invalid METRICS_HOST/METRICS_PORT")?;
        Some(metrics.serve(addr, cancel.clone())?.1)
    } else {
        info!("Metrics endpoint disabled (METRICS_PORT=0)");
        None
    };

    info!("");
    info!("⚙️  Active Configuration Summary:");
    info!("   ├─ Mode: {}", config.execution.mode);
    info!("   ├─ Compute unit limit: {}", config.execution.compute_unit_limit);
    info!("   ├─ Simulate before send: {}", config.execution.simulate_before_send);
    info!("   ├─ Halt on simulation failure: {}", config.execution.halt_on_sim_failure);
    info!(
        "   ├─ Hops: max {} (third hop {}, {} static table(s))",
        config.routing.max_hops,
        config.routing.allow_third_hop,
        config.routing.static_lookup_tables.len()
    );
    info!(
        "   ├─ Risk: {} failures -> {}ms cooldown",
        config.risk.max_consecutive_failures, config.risk.cooldown_ms
    );
    info!("   └─ Tick delay: {}ms", config.execution.tick_delay_ms);
    info!("");
    if config.execution.mode == RuntimeMode::Live {
        warn!("⚠️  LIVE mode: transactions will be broadcast");
    }

    let mut orchestrator = Orchestrator::new(config, edges, ledger, payer, metrics);

    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("👋 Ctrl+C received, shutting down...");
            ctrl_c_token.cancel();
        }
    });

    info!("🔄 Press Ctrl+C to stop");
    orchestrator.run(cancel.clone(), args.once).await;
    cancel.cancel();
    if let Some(server) = metrics_server {
        if let Err(e) = server.await {
            warn!("Metrics server task ended abnormally: {}", e);
        }
    }

    println!("{}", orchestrator.report().render_markdown());
    match orchestrator.metrics().render() {
        Ok(text) => debug!("final metrics:\n{}", text),
        Err(e) => warn!("Failed to render metrics: {:#}", e),
    }
    Ok(())
}

/// Console layer always; daily-rotated file layer when `LOG_DIR` is set.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create EnvFilter")?;

    let console = if logging.json {
        fmt::layer().json().with_target(false).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tri-arb.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

/// Load wallet keypair from file or environment variable
fn load_keypair(wallet_config: &WalletConfig) -> Result<Keypair> {
    if let Some(ref keypair_path) = wallet_config.keypair_path {
        info!("Loading keypair from file: {}", keypair_path);
        read_keypair_file(keypair_path).map_err(|e| anyhow::anyhow!("Failed to read keypair file: {}", e))
    } else if let Some(ref private_key) = wallet_config.private_key {
        info!("Loading keypair from environment variable");
        let decoded = bs58::decode(private_key.trim())
            .into_vec()
            .context("Failed to decode base58 private key")?;
        Keypair::from_bytes(&decoded).context("Failed to create keypair from bytes")
    } else {
        Err(anyhow::anyhow!(
            "No wallet configuration found. Set WALLET_KEYPAIR_PATH or WALLET_PRIVATE_KEY"
        ))
    }
}

async fn check_balance(ledger: &dyn Ledger, wallet: &Pubkey, min_balance_sol: f64) {
    match ledger.balance(wallet).await {
        Ok(balance) => {
            let balance_sol = balance as f64 / 1e9;
            info!("💰 Wallet balance: {:.4} SOL ({} lamports)", balance_sol, balance);
            if balance_sol < min_balance_sol {
                warn!(
                    "⚠️  Low wallet balance! Current: {:.4} SOL, Minimum: {:.2} SOL",
                    balance_sol, min_balance_sol
                );
            }
        }
        Err(e) => {
            error!("❌ Failed to check wallet balance: {:#}", e);
            warn!("   Continuing anyway, but transactions may fail due to insufficient balance");
        }
    }
}

async fn check_token_accounts(ledger: &dyn Ledger, wallet: &Pubkey, mints: &[Pubkey]) {
    let atas: Vec<Pubkey> = mints
        .iter()
        .map(|mint| get_associated_token_address(wallet, mint))
        .collect();
    match ledger.multiple_accounts(&atas).await {
        Ok(accounts) => {
            let missing: Vec<(&Pubkey, &Pubkey)> = mints
                .iter()
                .zip(atas.iter())
                .zip(accounts.iter())
                .filter(|(_, account)| account.is_none())
                .map(|(pair, _)| pair)
                .collect();
            if missing.is_empty() {
                info!("✅ Token accounts present for all {} mints", mints.len());
            }
            for (mint, ata) in missing {
                warn!("⚠️  Missing associated token account {} for mint {}", ata, mint);
            }
        }
        Err(e) => warn!("⚠️  Could not check token accounts: {:#}", e),
    }
}
