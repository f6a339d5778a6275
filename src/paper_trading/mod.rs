// =============================================================================
// Paper-Trading Engine — single-writer portfolio state machine
// =============================================================================
//
// All mutations are processed by exactly one task draining a FIFO command
// queue, so commands are applied in submission order with no lock
// contention between open/tick/close. State lives entirely inside the task
// that owns it — an actor, not a shared `RwLock<Inner>` — because ordering
// matters here, not just mutual exclusion.
//
// Commands are submitted through a bounded `mpsc` channel; `send` blocks the
// caller once the queue is full. Every other cross-task boundary in the
// pipeline drops oldest instead of blocking — this is the one place
// backpressure is allowed to propagate to the caller.
// =============================================================================

use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::runtime_config::RuntimeConfig;
use crate::types::{
    CloseReason, Decision, MarketTick, PipelineEvent, Portfolio, PortfolioMetrics, Position,
    PositionStatus, Recommendation,
};

const COMMAND_QUEUE_CAPACITY: usize = 1024;
/// Log a warning once the command queue is this full — a high-water alarm
/// on this one blocking boundary.
const HIGH_WATER_ALARM_FRACTION: f64 = 0.8;

/// Why `requestOpen` was rejected without creating a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRejection {
    WrongRecommendation,
    MaxOpenPositionsReached,
    NoReferencePrice,
    SizeBelowMinimum,
}

enum Command {
    RequestOpen {
        decision: Decision,
        reply: oneshot::Sender<Result<String, OpenRejection>>,
    },
    OnTick(MarketTick),
    Close {
        address: String,
        reason: CloseReason,
    },
    Snapshot(oneshot::Sender<Portfolio>),
}

/// Handle held by producers (Scoring, Market Data Router, CLI) to submit
/// commands to the single writer task.
#[derive(Clone)]
pub struct PaperTradingHandle {
    tx: mpsc::Sender<Command>,
}

impl PaperTradingHandle {
    pub async fn request_open(&self, decision: Decision) -> Result<String, OpenRejection> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::RequestOpen { decision, reply })
            .await
            .is_err()
        {
            return Err(OpenRejection::NoReferencePrice);
        }
        rx.await.unwrap_or(Err(OpenRejection::NoReferencePrice))
    }

    pub async fn on_tick(&self, tick: MarketTick) {
        let _ = self.tx.send(Command::OnTick(tick)).await;
    }

    pub async fn close(&self, address: impl Into<String>, reason: CloseReason) {
        let _ = self
            .tx
            .send(Command::Close {
                address: address.into(),
                reason,
            })
            .await;
    }

    pub async fn snapshot(&self) -> Portfolio {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Snapshot(reply)).await;
        rx.await.expect("paper-trading writer task is alive")
    }
}

struct Inner {
    cfg: RuntimeConfig,
    cash_usd: f64,
    peak_equity_usd: f64,
    open_positions: Vec<Position>,
    closed_positions: VecDeque<Position>,
    metrics: PortfolioMetrics,
    telemetry: mpsc::UnboundedSender<PipelineEvent>,
}

impl Inner {
    fn equity_usd(&self) -> f64 {
        let mark_to_market: f64 = self
            .open_positions
            .iter()
            .map(|p| p.size_usd * p.last_price_usd / p.entry_price_usd)
            .sum();
        self.cash_usd + mark_to_market
    }

    fn publish(&self, event: PipelineEvent) {
        // Non-blocking by construction: unbounded send never awaits.
        let _ = self.telemetry.send(event);
    }

    fn handle_request_open(&mut self, decision: Decision) -> Result<String, OpenRejection> {
        if !matches!(
            decision.recommendation,
            Recommendation::Buy | Recommendation::StrongBuy
        ) {
            return Err(OpenRejection::WrongRecommendation);
        }
        if self.open_positions.len() >= self.cfg.max_open_positions {
            return Err(OpenRejection::MaxOpenPositionsReached);
        }
        let entry_price = match decision.reference_price_usd {
            Some(p) if p > 0.0 => p,
            _ => return Err(OpenRejection::NoReferencePrice),
        };

        let size_usd = if decision.suggested_position_usd > self.cash_usd {
            self.cash_usd
        } else {
            decision.suggested_position_usd
        };
        if size_usd < self.cfg.sizing.min_trade_usd {
            return Err(OpenRejection::SizeBelowMinimum);
        }

        let now = Utc::now().timestamp_millis();
        let position = Position {
            id: Uuid::new_v4().to_string(),
            address: decision.address.clone(),
            symbol: decision.address.clone(),
            opened_at: now,
            entry_price_usd: entry_price,
            size_usd,
            stop_price_usd: entry_price * (1.0 - decision.suggested_stop_loss_pct),
            take_profit_price_usd: entry_price * (1.0 + decision.suggested_take_profit_pct),
            trailing_high_usd: entry_price,
            status: PositionStatus::Open,
            close_reason: None,
            realized_pnl_usd: 0.0,
            last_price_usd: entry_price,
            last_update_at: now,
        };

        self.cash_usd -= size_usd;
        let id = position.id.clone();
        info!(
            id = %id,
            address = %position.address,
            entry_price,
            size_usd,
            "paper position opened"
        );
        self.publish(PipelineEvent::TradeOpened {
            position_id: id.clone(),
            address: position.address.clone(),
            size_usd,
            entry_price_usd: entry_price,
            ts: now,
        });
        self.open_positions.push(position);
        self.peak_equity_usd = self.peak_equity_usd.max(self.equity_usd());
        Ok(id)
    }

    fn handle_tick(&mut self, tick: MarketTick) {
        let Some(idx) = self
            .open_positions
            .iter()
            .position(|p| p.address == tick.address)
        else {
            return;
        };

        let close_reason = {
            let pos = &mut self.open_positions[idx];
            pos.last_price_usd = tick.price_usd;
            pos.last_update_at = tick.ts;
            pos.trailing_high_usd = pos.trailing_high_usd.max(tick.price_usd);

            if tick.price_usd <= pos.stop_price_usd {
                Some(CloseReason::StopLoss)
            } else if tick.price_usd >= pos.take_profit_price_usd {
                Some(CloseReason::TakeProfit)
            } else if tick.price_usd
                <= pos.trailing_high_usd * (1.0 - self.cfg.exit.trailing_drawdown_pct)
            {
                Some(CloseReason::Trailing)
            } else if tick.ts - pos.opened_at >= self.cfg.exit.max_hold_ms {
                Some(CloseReason::TimeExit)
            } else {
                None
            }
        };

        self.peak_equity_usd = self.peak_equity_usd.max(self.equity_usd());

        if let Some(reason) = close_reason {
            let address = self.open_positions[idx].address.clone();
            self.do_close(&address, reason);
        }
    }

    fn do_close(&mut self, address: &str, reason: CloseReason) {
        let Some(idx) = self.open_positions.iter().position(|p| p.address == address) else {
            return;
        };
        let mut pos = self.open_positions.remove(idx);

        let realized_pnl_usd =
            pos.size_usd * (pos.last_price_usd - pos.entry_price_usd) / pos.entry_price_usd;

        if !realized_pnl_usd.is_finite() {
            error!(address, "invariant violation computing realized PnL — position returned to open set");
            self.open_positions.insert(idx, pos);
            self.publish(PipelineEvent::Error {
                message: format!("InvariantError: non-finite PnL for {address}"),
                ts: Utc::now().timestamp_millis(),
            });
            return;
        }

        pos.status = PositionStatus::Closed;
        pos.close_reason = Some(reason);
        pos.realized_pnl_usd = realized_pnl_usd;
        self.cash_usd += pos.size_usd + realized_pnl_usd;

        self.metrics.trades += 1;
        if realized_pnl_usd >= 0.0 {
            self.metrics.wins += 1;
        } else {
            self.metrics.losses += 1;
        }
        let equity = self.equity_usd();
        self.peak_equity_usd = self.peak_equity_usd.max(equity);
        if self.peak_equity_usd > 0.0 {
            let drawdown_pct = (self.peak_equity_usd - equity) / self.peak_equity_usd * 100.0;
            self.metrics.max_drawdown_pct = self.metrics.max_drawdown_pct.max(drawdown_pct);
        }

        info!(
            id = %pos.id,
            address,
            reason = %reason,
            realized_pnl_usd,
            cash_usd = self.cash_usd,
            "paper position closed"
        );
        self.publish(PipelineEvent::TradeClosed {
            position_id: pos.id.clone(),
            address: pos.address.clone(),
            reason,
            realized_pnl_usd,
            ts: Utc::now().timestamp_millis(),
        });

        if self.closed_positions.len() >= self.cfg.closed_positions_ring_capacity {
            self.closed_positions.pop_front();
        }
        self.closed_positions.push_back(pos);
    }

    fn snapshot(&self) -> Portfolio {
        Portfolio {
            cash_usd: self.cash_usd,
            equity_usd: self.equity_usd(),
            peak_equity_usd: self.peak_equity_usd,
            open_positions: self.open_positions.clone(),
            closed_positions: self.closed_positions.iter().cloned().collect(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Spawn the single writer task and return a cloneable handle to it.
pub fn spawn(cfg: RuntimeConfig, telemetry: mpsc::UnboundedSender<PipelineEvent>) -> PaperTradingHandle {
    let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let high_water = (COMMAND_QUEUE_CAPACITY as f64 * HIGH_WATER_ALARM_FRACTION) as usize;

    let mut inner = Inner {
        cash_usd: cfg.starting_cash_usd,
        peak_equity_usd: cfg.starting_cash_usd,
        open_positions: Vec::new(),
        closed_positions: VecDeque::with_capacity(cfg.closed_positions_ring_capacity),
        metrics: PortfolioMetrics::default(),
        cfg,
        telemetry,
    };

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            if rx.len() >= high_water {
                warn!(
                    queue_len = rx.len(),
                    capacity = COMMAND_QUEUE_CAPACITY,
                    "paper-trading command queue above high-water mark"
                );
            }
            match cmd {
                Command::RequestOpen { decision, reply } => {
                    let result = inner.handle_request_open(decision);
                    let _ = reply.send(result);
                }
                Command::OnTick(tick) => inner.handle_tick(tick),
                Command::Close { address, reason } => inner.do_close(&address, reason),
                Command::Snapshot(reply) => {
                    let _ = reply.send(inner.snapshot());
                }
            }
        }
    });

    PaperTradingHandle { tx }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReasonTag;

    fn decision(address: &str, recommendation: Recommendation, price: f64, size: f64) -> Decision {
        Decision {
            address: address.to_string(),
            recommendation,
            score: 72.0,
            confidence: 0.9,
            reasons: vec![ReasonTag::HolderGrowth],
            suggested_position_usd: size,
            suggested_stop_loss_pct: 0.15,
            suggested_take_profit_pct: 0.25,
            reference_price_usd: Some(price),
            timeframe_hint: "5m".to_string(),
        }
    }

    fn tick(address: &str, price: f64, ts: i64) -> MarketTick {
        MarketTick {
            address: address.to_string(),
            price_usd: price,
            volume_usd: 0.0,
            ts,
        }
    }

    async fn engine_with_cash(cash: f64) -> PaperTradingHandle {
        let mut cfg = RuntimeConfig::default();
        cfg.starting_cash_usd = cash;
        let (telemetry_tx, _telemetry_rx) = mpsc::unbounded_channel();
        spawn(cfg, telemetry_tx)
    }

    #[tokio::test]
    async fn scenario_b_clean_buy_and_take_profit() {
        let engine = engine_with_cash(1000.0).await;
        let d = decision("A1", Recommendation::Buy, 1.0, 14.40);
        let id = engine.request_open(d).await.unwrap();

        engine.on_tick(tick("A1", 1.05, 1_000)).await;
        engine.on_tick(tick("A1", 1.10, 2_000)).await;
        engine.on_tick(tick("A1", 1.26, 3_000)).await;

        let snapshot = engine.snapshot().await;
        assert!(snapshot.open_positions.is_empty());
        let closed = snapshot
            .closed_positions
            .iter()
            .find(|p| p.id == id)
            .unwrap();
        assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
        assert!((closed.realized_pnl_usd - 3.744).abs() < 1e-6);
        assert!((snapshot.cash_usd - 1003.744).abs() < 1e-6);
    }

    #[tokio::test]
    async fn scenario_c_stop_loss() {
        let engine = engine_with_cash(1000.0).await;
        let d = decision("A1", Recommendation::Buy, 2.000, 20.0);
        engine.request_open(d).await.unwrap();

        engine.on_tick(tick("A1", 1.95, 1_000)).await;
        engine.on_tick(tick("A1", 1.80, 2_000)).await;
        engine.on_tick(tick("A1", 1.69, 3_000)).await;

        let snapshot = engine.snapshot().await;
        let closed = &snapshot.closed_positions[0];
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert!((closed.realized_pnl_usd - (-3.10)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn scenario_d_trailing_exit() {
        let engine = engine_with_cash(1000.0).await;
        let d = decision("A1", Recommendation::Buy, 1.000, 10.0);
        engine.request_open(d).await.unwrap();

        engine.on_tick(tick("A1", 1.20, 1_000)).await;
        engine.on_tick(tick("A1", 1.40, 2_000)).await;
        engine.on_tick(tick("A1", 1.18, 3_000)).await;

        let snapshot = engine.snapshot().await;
        let closed = &snapshot.closed_positions[0];
        assert_eq!(closed.close_reason, Some(CloseReason::Trailing));
        assert!((closed.realized_pnl_usd - 1.80).abs() < 1e-6);
    }

    #[tokio::test]
    async fn time_exit_fires_after_max_hold() {
        let mut cfg = RuntimeConfig::default();
        cfg.exit.max_hold_ms = 1_000;
        let (telemetry_tx, _rx) = mpsc::unbounded_channel();
        let engine = spawn(cfg, telemetry_tx);
        let d = decision("A1", Recommendation::Buy, 1.0, 10.0);
        engine.request_open(d).await.unwrap();
        engine.on_tick(tick("A1", 1.01, 5_000)).await;

        let snapshot = engine.snapshot().await;
        assert_eq!(
            snapshot.closed_positions[0].close_reason,
            Some(CloseReason::TimeExit)
        );
    }

    #[tokio::test]
    async fn skip_recommendation_is_rejected() {
        let engine = engine_with_cash(1000.0).await;
        let d = decision("A1", Recommendation::Skip, 1.0, 10.0);
        let result = engine.request_open(d).await;
        assert_eq!(result, Err(OpenRejection::WrongRecommendation));
    }

    #[tokio::test]
    async fn max_open_positions_is_enforced() {
        let mut cfg = RuntimeConfig::default();
        cfg.max_open_positions = 1;
        let (telemetry_tx, _rx) = mpsc::unbounded_channel();
        let engine = spawn(cfg, telemetry_tx);
        engine
            .request_open(decision("A1", Recommendation::Buy, 1.0, 10.0))
            .await
            .unwrap();
        let result = engine
            .request_open(decision("A2", Recommendation::Buy, 1.0, 10.0))
            .await;
        assert_eq!(result, Err(OpenRejection::MaxOpenPositionsReached));
    }

    #[tokio::test]
    async fn sizing_clamps_to_available_cash() {
        let engine = engine_with_cash(20.0).await;
        let d = decision("A1", Recommendation::Buy, 1.0, 500.0);
        let id = engine.request_open(d).await.unwrap();
        let snapshot = engine.snapshot().await;
        let pos = snapshot.open_positions.iter().find(|p| p.id == id).unwrap();
        assert!((pos.size_usd - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn size_below_minimum_after_clamp_is_rejected() {
        let engine = engine_with_cash(5.0).await;
        let d = decision("A1", Recommendation::Buy, 1.0, 500.0);
        let result = engine.request_open(d).await;
        assert_eq!(result, Err(OpenRejection::SizeBelowMinimum));
    }
}
