// =============================================================================
// Application State — shared handles for every pipeline stage
// =============================================================================
//
// One `AppState` is built at startup and handed to every task and API route
// as an `Arc<AppState>`. Each field owns its own concurrency story (actor,
// lock-free map, atomic) — this struct is just where they're all reachable
// from.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};

use crate::enrichment::EnrichmentOrchestrator;
use crate::fabric::SocketFabric;
use crate::intake::{IntakeSnapshot, TokenIntake};
use crate::market_router::MarketDataRouter;
use crate::paper_trading::PaperTradingHandle;
use crate::ratelimit::{ProviderHealth, RateLimitCacheLayer};
use crate::runtime_config::RuntimeConfig;
use crate::telemetry::{TelemetryBus, TelemetrySnapshot};
use crate::types::{PipelineEvent, Portfolio};

/// Dashboard-facing rollup of every subsystem's health in one shape.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub server_time: i64,
    pub trading_mode: String,
    pub portfolio: Portfolio,
    pub intake: IntakeSnapshot,
    pub providers: Vec<ProviderHealth>,
    pub telemetry: TelemetrySnapshot,
}

pub struct AppState {
    pub runtime_config: RwLock<RuntimeConfig>,
    pub fabric: Arc<SocketFabric>,
    pub intake: Arc<TokenIntake>,
    pub ratelimit: Arc<RateLimitCacheLayer>,
    pub enrichment: Arc<EnrichmentOrchestrator>,
    pub trading: PaperTradingHandle,
    pub market_router: Arc<MarketDataRouter>,
    pub telemetry_bus: Arc<TelemetryBus>,
    pub telemetry_tx: mpsc::UnboundedSender<PipelineEvent>,
    /// Notified by `control_kill` (and the CLI `stop` subcommand through it)
    /// to trigger the same graceful shutdown sequence `main` runs on
    /// `Ctrl+C` — cancel ingestion, flush telemetry, snapshot the
    /// portfolio — rather than just flipping `trading_mode`.
    pub shutdown_notify: Arc<Notify>,
}

impl AppState {
    pub fn new(cfg: RuntimeConfig) -> Self {
        let fabric = Arc::new(SocketFabric::new());
        let intake = Arc::new(TokenIntake::new(
            cfg.dedup_window_ms,
            cfg.max_concurrent_analyses,
            cfg.intake_queue_capacity,
        ));
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let enrichment = Arc::new(EnrichmentOrchestrator::new(&cfg, ratelimit.clone()));
        let (telemetry_tx, telemetry_bus) = crate::telemetry::spawn(None);
        let trading = crate::paper_trading::spawn(cfg.clone(), telemetry_tx.clone());
        let market_router = Arc::new(MarketDataRouter::new(fabric.clone(), cfg.upstream_url.clone()));

        Self {
            runtime_config: RwLock::new(cfg),
            fabric,
            intake,
            ratelimit,
            enrichment,
            trading,
            market_router,
            telemetry_bus,
            telemetry_tx,
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.telemetry_tx.send(event);
    }

    /// Ask the process-level run loop to begin a graceful shutdown. Safe to
    /// call more than once; only the first notification matters.
    pub fn request_shutdown(&self) {
        self.shutdown_notify.notify_one();
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let trading_mode = self.runtime_config.read().trading_mode.to_string();
        StateSnapshot {
            server_time: chrono::Utc::now().timestamp_millis(),
            trading_mode,
            portfolio: self.trading.snapshot().await,
            intake: self.intake.snapshot(),
            providers: self.ratelimit.snapshot(),
            telemetry: self.telemetry_bus.snapshot(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_state_reports_empty_portfolio_and_intake() {
        let state = AppState::new(RuntimeConfig::default());
        let snap = state.snapshot().await;
        assert!(snap.portfolio.open_positions.is_empty());
        assert_eq!(snap.intake.in_flight, 0);
    }

    #[test]
    fn publish_never_panics_without_subscribers() {
        let state = AppState::new(RuntimeConfig::default());
        state.publish(PipelineEvent::Error {
            message: "test".to_string(),
            ts: 0,
        });
    }

    #[tokio::test]
    async fn request_shutdown_wakes_a_waiter() {
        let state = Arc::new(AppState::new(RuntimeConfig::default()));
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state.shutdown_notify.notified().await;
            })
        };
        state.request_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("shutdown notification should wake the waiter")
            .expect("waiter task should not panic");
    }
}
