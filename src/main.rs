// =============================================================================
// Aurora Meme Nexus — Main Entry Point
// =============================================================================
//
// The engine starts Paused for safety. An operator must explicitly resume
// trading via the dashboard, API, or CLI.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adapters;
mod api;
mod app_state;
mod cli;
mod enrichment;
mod fabric;
mod indicators;
mod intake;
mod market_router;
mod paper_trading;
mod ratelimit;
mod runtime_config;
mod scoring;
mod telemetry;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::{parse_envelope, to_candidate, UpstreamEvent};
use crate::app_state::AppState;
use crate::cli::{Cli, Command};
use crate::fabric::FabricOptions;
use crate::runtime_config::RuntimeConfig;
use crate::types::{CloseReason, PipelineEvent, TradingMode};

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let result = match cli.command.unwrap_or(Command::Start) {
        Command::Start => run().await,
        Command::Status => cli::status().await,
        Command::Stop => cli::stop().await,
    };

    if let Err(e) = result {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Meme Nexus — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    // Always start Paused — an operator must explicitly arm the engine.
    config.trading_mode = TradingMode::Paused;

    info!(trading_mode = %config.trading_mode, upstream_url = %config.upstream_url, "engine configured");

    let state = Arc::new(AppState::new(config));

    spawn_ingestion(state.clone());
    spawn_pipeline_worker(state.clone());
    spawn_position_routing(state.clone());
    tokio::spawn(state.market_router.clone().run(state.trading.clone()));
    spawn_snapshot_writer(state.clone());
    spawn_dedup_purge(state.clone());

    // Bound here, not inside the spawned task, so a bad bind address fails
    // startup (exit code 1) instead of panicking silently in the background.
    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped unexpectedly");
        }
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // `stop`/`control_kill` and Ctrl+C both run the same graceful-shutdown
    // sequence; neither merely flips `trading_mode` with nothing downstream
    // reading it.
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            warn!("shutdown signal received — stopping gracefully");
        }
        _ = state.shutdown_notify.notified() => {
            warn!("shutdown requested via control endpoint — stopping gracefully");
        }
    }
    shutdown(&state).await;

    info!("aurora meme nexus shut down complete");
    // Background tasks (ingestion, API server, writer loops) are daemon
    // tasks with no independent shutdown handshake; exit the process now
    // that the portfolio and config are safely persisted, rather than
    // leaving them running against a torn-down state.
    std::process::exit(0);
}

/// Subscribe to the upstream feed (new pairs, surge updates, fees, bulk
/// pulse) and the dedicated whale feed, translating fabric frames into
/// typed events and submitting candidates to Token Intake.
fn spawn_ingestion(state: Arc<AppState>) {
    let upstream_url = state.runtime_config.read().upstream_url.clone();
    let whale_url = state.runtime_config.read().whale_feed_url.clone();

    {
        let state = state.clone();
        tokio::spawn(async move {
            let conn = state.fabric.get_shared_connection(&upstream_url, FabricOptions::default());
            let mut sub = conn.subscribe();
            while let Some(msg) = sub.recv().await {
                let Some(decoded) = &msg.decoded else { continue };
                let events = match parse_envelope(decoded) {
                    Ok(events) => events,
                    Err(reason) => {
                        state.publish(PipelineEvent::Error {
                            message: format!("upstream decode: {reason}"),
                            ts: chrono::Utc::now().timestamp_millis(),
                        });
                        continue;
                    }
                };
                for event in events {
                    handle_upstream_event(&state, event);
                }
            }
            warn!("upstream fabric subscription ended");
        });
    }

    tokio::spawn(async move {
        let conn = state.fabric.get_shared_connection(&whale_url, FabricOptions::default());
        let mut sub = conn.subscribe();
        while let Some(msg) = sub.recv().await {
            let Some(decoded) = &msg.decoded else { continue };
            let items = decoded.as_array().cloned().unwrap_or_else(|| vec![decoded.clone()]);
            for item in items {
                if let Ok(UpstreamEvent::WhaleTrade { address, amount_usd, .. }) =
                    crate::adapters::parse_whale_trade(&item)
                {
                    state.publish(PipelineEvent::Error {
                        message: format!("whale trade observed on {address} ({amount_usd} usd)"),
                        ts: chrono::Utc::now().timestamp_millis(),
                    });
                }
            }
        }
        warn!("whale fabric subscription ended");
    });
}

fn handle_upstream_event(state: &Arc<AppState>, event: UpstreamEvent) {
    match &event {
        UpstreamEvent::FeeUpdate { kind, value_sol } => {
            state.publish(PipelineEvent::FeeUpdate {
                kind: format!("{kind:?}"),
                value_sol: *value_sol,
                ts: chrono::Utc::now().timestamp_millis(),
            });
        }
        UpstreamEvent::BulkPulse { .. } | UpstreamEvent::BlockHash { .. } => {}
        UpstreamEvent::MarketTick(_) => {
            // Delivered on `b-<address>` rooms, routed separately by
            // `MarketDataRouter` for addresses with open positions.
        }
        UpstreamEvent::WhaleTrade { .. } => {}
        UpstreamEvent::NewToken { .. } | UpstreamEvent::SurgeUpdate { .. } => {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let Some(candidate) = to_candidate(&event, now_ms) {
                state.publish(PipelineEvent::NewCandidate {
                    address: candidate.address.clone(),
                    symbol: candidate.symbol.clone(),
                    source: candidate.source,
                    ts: now_ms,
                });
                if let Err(reason) = state.intake.submit(candidate, now_ms) {
                    debug_drop(state, reason);
                }
            }
        }
    }
}

fn debug_drop(state: &Arc<AppState>, reason: crate::types::DropReason) {
    state.publish(PipelineEvent::Error {
        message: format!("candidate dropped: {reason}"),
        ts: chrono::Utc::now().timestamp_millis(),
    });
}

/// Drain queued candidates and carry each through enrichment, scoring, and
/// (on a BUY-class recommendation) the Paper-Trading Engine. Runs one task
/// per configured `max_concurrent_analyses` slot; `TokenIntake` already
/// bounds how many candidates are in flight at once, so a single worker
/// loop pulling serially is sufficient — concurrency comes from overlapping
/// the awaited stages of consecutive tasks via `tokio::spawn` per task.
fn spawn_pipeline_worker(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            let task = state.intake.next_task().await;
            let state = state.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let bundle = state.enrichment.enrich(&task.candidate).await;
                state.publish(PipelineEvent::EnrichmentDone {
                    address: task.candidate.address.clone(),
                    completeness: bundle.completeness,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });

                let cash_usd = state.trading.snapshot().await.cash_usd;
                let cfg = state.runtime_config.read().clone();
                let decision = crate::scoring::score_candidate(&bundle, cash_usd, &cfg);

                state.publish(PipelineEvent::DecisionMade {
                    address: decision.address.clone(),
                    recommendation: decision.recommendation,
                    score: decision.score,
                    ts: chrono::Utc::now().timestamp_millis(),
                });

                let is_live = matches!(cfg.trading_mode, TradingMode::Live);
                let buyable = matches!(
                    decision.recommendation,
                    crate::types::Recommendation::StrongBuy | crate::types::Recommendation::Buy
                );
                if is_live && buyable {
                    match state.trading.request_open(decision).await {
                        Ok(position_id) => {
                            state.market_router.track(&task.candidate.address);
                            info!(position_id, address = %task.candidate.address, "position opened");
                        }
                        Err(rejection) => {
                            warn!(address = %task.candidate.address, ?rejection, "open request rejected");
                        }
                    }
                }

                state.intake.on_analysis_done(&task.candidate.address);
            });
        }
    });
}

/// React to trade-lifecycle telemetry so the Market Data Router only tracks
/// addresses with a live position.
fn spawn_position_routing(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut sub = state.telemetry_bus.subscribe();
        while let Some(event) = sub.recv().await {
            if let PipelineEvent::TradeClosed { address, .. } = event.as_ref() {
                state.market_router.untrack(address);
            }
        }
    });
}

fn spawn_snapshot_writer(state: Arc<AppState>) {
    tokio::spawn(async move {
        let interval_secs = state.runtime_config.read().portfolio_snapshot_interval_secs;
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            let portfolio = state.trading.snapshot().await;
            state.publish(PipelineEvent::PortfolioSnapshot {
                cash_usd: portfolio.cash_usd,
                equity_usd: portfolio.equity_usd,
                open_positions: portfolio.open_positions.len(),
                ts: chrono::Utc::now().timestamp_millis(),
            });
            if let Err(e) = save_portfolio_snapshot(&portfolio) {
                error!(error = %e, "failed to persist portfolio snapshot");
            }
        }
    });
}

fn save_portfolio_snapshot(portfolio: &crate::types::Portfolio) -> anyhow::Result<()> {
    use anyhow::Context;
    let path = std::path::Path::new("portfolio_snapshot.json");
    let content = serde_json::to_string_pretty(portfolio).context("serialize portfolio snapshot")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content).context("write tmp portfolio snapshot")?;
    std::fs::rename(&tmp_path, path).context("rename tmp portfolio snapshot")?;
    Ok(())
}

fn spawn_dedup_purge(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            state.intake.purge_expired(chrono::Utc::now().timestamp_millis());
        }
    });
}

/// Graceful shutdown: stop accepting new candidates (the process
/// exiting the ingestion loops takes care of that), give in-flight
/// enrichment a bounded grace window, snapshot the portfolio one last time,
/// and persist the runtime config.
async fn shutdown(state: &Arc<AppState>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.intake.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let portfolio = state.trading.snapshot().await;
    if let Err(e) = save_portfolio_snapshot(&portfolio) {
        error!(error = %e, "failed to persist final portfolio snapshot");
    }

    if let Err(e) = state.runtime_config.read().save(RUNTIME_CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    // Close every open position at shutdown so the snapshot reflects a
    // consistent book rather than positions orphaned mid-flight.
    for position in &portfolio.open_positions {
        state.trading.close(&position.address, CloseReason::Manual).await;
    }
}
