//! # Engine Metrics
//!
//! Prometheus counters and gauges for the execution loop. Each `Metrics` owns its
//! own `Registry`, so several engines (or tests) can run in one process without
//! colliding on metric names. `serve` exposes the registry on `/metrics`.

use anyhow::{Context, Result};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warp::{Filter, Reply};

use crate::chain::fees::FeeState;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub trades_sent: IntCounter,
    pub trades_confirmed: IntCounter,
    pub trades_sim_failed: IntCounter,
    pub trades_exec_failed: IntCounter,
    pub cycles_found: IntCounter,
    pub priority_fee: IntGauge,
    pub inclusion_ratio: Gauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("trades_sent", &self.trades_sent.get())
            .field("trades_confirmed", &self.trades_confirmed.get())
            .field("trades_sim_failed", &self.trades_sim_failed.get())
            .field("trades_exec_failed", &self.trades_exec_failed.get())
            .field("cycles_found", &self.cycles_found.get())
            .field("priority_fee", &self.priority_fee.get())
            .field("inclusion_ratio", &self.inclusion_ratio.get())
            .finish()
    }
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("tri_arb".to_string()), None)
            .context("Failed to create metrics registry")?;

        let trades_sent = IntCounter::new("trades_sent_total", "Trade transactions submitted for broadcast.")?;
        let trades_confirmed = IntCounter::new("trades_confirmed_total", "Transactions confirmed on chain.")?;
        let trades_sim_failed = IntCounter::new("trades_sim_failed_total", "Candidates rejected by simulation.")?;
        let trades_exec_failed = IntCounter::new(
            "trades_exec_failed_total",
            "Broadcast transactions that failed or timed out.",
        )?;
        let cycles_found = IntCounter::new("cycles_found_total", "Profitable cycles discovered.")?;
        let priority_fee = IntGauge::new("priority_fee_micro_lamports", "Current compute unit price bid.")?;
        let inclusion_ratio = Gauge::new("inclusion_ratio", "Confirmed over sent.")?;

        registry.register(Box::new(trades_sent.clone()))?;
        registry.register(Box::new(trades_confirmed.clone()))?;
        registry.register(Box::new(trades_sim_failed.clone()))?;
        registry.register(Box::new(trades_exec_failed.clone()))?;
        registry.register(Box::new(cycles_found.clone()))?;
        registry.register(Box::new(priority_fee.clone()))?;
        registry.register(Box::new(inclusion_ratio.clone()))?;

        Ok(Self {
            registry,
            trades_sent,
            trades_confirmed,
            trades_sim_failed,
            trades_exec_failed,
            cycles_found,
            priority_fee,
            inclusion_ratio,
        })
    }

    /// Mirror the fee controller state into the gauges.
    pub fn observe_fees(&self, state: &FeeState) {
        self.priority_fee.set(state.priority_fee.min(i64::MAX as u64) as i64);
        self.inclusion_ratio.set(state.inclusion_ratio());
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }

    /// Serve `/metrics` on `addr` until `cancel` fires. Returns the bound address.
    pub fn serve(&self, addr: SocketAddr, cancel: CancellationToken) -> Result<(SocketAddr, JoinHandle<()>)> {
        let metrics = self.clone();
        let route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || metrics_reply(&metrics));

        let (bound, server) = warp::serve(route)
            .try_bind_with_graceful_shutdown(addr, async move { cancel.cancelled().await })
            .with_context(|| format!("Failed to bind metrics server on {}", addr))?;
        info!("📈 Prometheus metrics on http://{}/metrics", bound);
        Ok((bound, tokio::spawn(server)))
    }

    /// One-line summary for the per-tick log
    pub fn summary(&self) -> String {
        format!(
            "sent={} confirmed={} sim_failed={} exec_failed={} cycles={} fee={} inclusion={:.2}",
            self.trades_sent.get(),
            self.trades_confirmed.get(),
            self.trades_sim_failed.get(),
            self.trades_exec_failed.get(),
            self.cycles_found.get(),
            self.priority_fee.get(),
            self.inclusion_ratio.get()
        )
    }
}

fn metrics_reply(metrics: &Metrics) -> warp::reply::Response {
    match metrics.render() {
        Ok(body) => warp::reply::with_header(body, "Content-Type", TextEncoder::new().format_type()).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {:#}", e);
            warp::reply::with_status(
                "Failed to encode metrics".to_string(),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_series() {
        let metrics = Metrics::new().unwrap();
        metrics.trades_sent.inc();
        metrics.cycles_found.inc_by(3);

        let text = metrics.render().unwrap();
        for name in [
            "tri_arb_trades_sent_total 1",
            "tri_arb_cycles_found_total 3",
            "tri_arb_trades_confirmed_total 0",
            "tri_arb_trades_sim_failed_total",
            "tri_arb_trades_exec_failed_total",
            "tri_arb_priority_fee_micro_lamports",
            "tri_arb_inclusion_ratio",
        ] {
            assert!(text.contains(name), "missing {} in:\n{}", name, text);
        }
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.trades_sent.inc();
        assert_eq!(b.trades_sent.get(), 0);
    }

    #[tokio::test]
    async fn test_serve_exposes_registry() {
        let metrics = Metrics::new().unwrap();
        metrics.trades_confirmed.inc_by(2);
        let cancel = CancellationToken::new();
        let (addr, handle) = metrics
            .serve("127.0.0.1:0".parse().unwrap(), cancel.clone())
            .unwrap();

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("tri_arb_trades_confirmed_total 2"));

        let missing = reqwest::get(format!("http://{}/other", addr)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_observe_fees() {
        let metrics = Metrics::new().unwrap();
        let mut state = FeeState::new(7_000);
        state.sent = 4;
        state.confirmed = 1;
        metrics.observe_fees(&state);
        assert_eq!(metrics.priority_fee.get(), 7_000);
        assert!((metrics.inclusion_ratio.get() - 0.25).abs() < f64::EPSILON);
        assert!(metrics.summary().contains("fee=7000"));
    }
}
