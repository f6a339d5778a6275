// =============================================================================
// Shared types used across the Aurora Meme Nexus pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// A newly observed token, canonicalized by the Token Intake stage.
///
/// Immutable once created — see [`crate::intake::TokenIntake`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCandidate {
    pub address: String,
    pub symbol: String,
    pub name: String,
    /// Milliseconds since epoch.
    pub first_seen_at: i64,
    pub initial_liquidity_usd: f64,
    #[serde(default)]
    pub initial_price_usd: Option<f64>,
    pub source: CandidateSource,
}

/// Which upstream room produced this candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateSource {
    NewPairs,
    SurgeUpdate,
}

impl std::fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewPairs => write!(f, "new_pairs"),
            Self::SurgeUpdate => write!(f, "surge-updates"),
        }
    }
}

/// A single price/volume observation for an address, pushed by the Shared
/// Socket Fabric's `b-<address>` room and routed by the Market Data Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub address: String,
    pub price_usd: f64,
    #[serde(default)]
    pub volume_usd: f64,
    /// Milliseconds since epoch.
    pub ts: i64,
}

/// Recommendation band produced by the Scoring & Decision Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Watch,
    Skip,
    Sell,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Watch => "WATCH",
            Self::Skip => "SKIP",
            Self::Sell => "SELL",
        };
        write!(f, "{s}")
    }
}

/// Enumerated reason tags — no free-form text is part of the scoring
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonTag {
    Honeypot,
    CreatorRugHistory,
    LowLiquidity,
    PausableMintableModifiable,
    ExtremeVolatility,
    TopHolderConcentration,
    NoSocials,
    HolderGrowth,
    ProfitableTradersHigh,
    LpBurned,
    OverboughtRsi,
    OversoldRsi,
    ProviderTimeout,
    ProviderRateLimited,
    ProviderAuthError,
    ProviderDecodeError,
    ProviderUnavailable,
    DeadlineExceeded,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Trailing,
    TimeExit,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::Trailing => "trailing",
            Self::TimeExit => "time_exit",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Security/safety fragment of an [`EnrichmentBundle`]. `None` fields mean
/// the provider didn't return that piece within the deadline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityFragment {
    pub is_honeypot: Option<bool>,
    pub is_open_source: Option<bool>,
    pub is_mintable: Option<bool>,
    pub transfer_pausable: Option<bool>,
    pub slippage_modifiable: Option<bool>,
    pub cooldown: Option<bool>,
    pub creator_rug_count: Option<u32>,
    pub lp_burned: Option<bool>,
}

/// Market/price/liquidity fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketFragment {
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub volume_1h: Option<f64>,
    pub volume_6h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub price_change_1h: Option<f64>,
    pub price_change_6h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub holders: Option<u64>,
    pub holder_growth_per_min: Option<f64>,
}

/// Holders/bundlers/snipers fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradersFragment {
    pub active_count: Option<u64>,
    pub whale_count: Option<u64>,
    pub sniper_count: Option<u64>,
    pub insider_ratio: Option<f64>,
    pub bundler_ratio: Option<f64>,
    pub profitable_ratio: Option<f64>,
}

/// Holder-distribution / flow-analysis fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowFragment {
    pub buy_flows: Option<f64>,
    pub sell_flows: Option<f64>,
    pub whale_flows: Option<f64>,
    pub top_holder_concentration_pct: Option<f64>,
}

/// Momentum / technical-indicator fragment, computed locally from a price
/// series when one is available rather than fetched from a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MomentumFragment {
    pub rsi: Option<f64>,
    pub macd_signal: Option<f64>,
    pub bollinger_position: Option<f64>,
    pub volume_spike: Option<bool>,
}

/// Social-presence fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocialFragment {
    pub has_twitter: bool,
    pub has_telegram: bool,
    pub has_website: bool,
}

/// Which fragments of an [`EnrichmentBundle`] were actually populated before
/// the orchestrator deadline — used by Scoring to reweight pro-rata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Completeness {
    pub security: bool,
    pub market: bool,
    pub traders: bool,
    pub flow: bool,
    pub momentum: bool,
    pub social: bool,
}

/// Assembled provider output for one candidate. Produced by the Enrichment
/// Orchestrator, consumed once by Scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentBundle {
    pub address: String,
    pub security: SecurityFragment,
    pub market: MarketFragment,
    pub traders: TradersFragment,
    pub flow: FlowFragment,
    pub momentum: MomentumFragment,
    pub social: SocialFragment,
    pub completeness: Completeness,
    /// Per-provider fetch latency in milliseconds, keyed by provider name.
    pub fetch_latencies_ms: std::collections::HashMap<String, u64>,
    pub reasons: Vec<ReasonTag>,
}

/// Output of the Scoring & Decision Engine. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub address: String,
    pub recommendation: Recommendation,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<ReasonTag>,
    pub suggested_position_usd: f64,
    pub suggested_stop_loss_pct: f64,
    pub suggested_take_profit_pct: f64,
    pub reference_price_usd: Option<f64>,
    pub timeframe_hint: String,
}

/// Lifecycle state of a [`Position`]. Transitions only OPEN -> CLOSING ->
/// CLOSED; CLOSING is transient and never visible outside the Paper-Trading
/// Engine except via events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

/// A simulated position, owned exclusively by the Paper-Trading Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub address: String,
    pub symbol: String,
    pub opened_at: i64,
    pub entry_price_usd: f64,
    pub size_usd: f64,
    pub stop_price_usd: f64,
    pub take_profit_price_usd: f64,
    pub trailing_high_usd: f64,
    pub status: PositionStatus,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    #[serde(default)]
    pub realized_pnl_usd: f64,
    pub last_price_usd: f64,
    pub last_update_at: i64,
}

/// Aggregate portfolio metrics, recomputed on every close.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
}

/// A read-only, deep-copied view of the portfolio for external readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash_usd: f64,
    pub equity_usd: f64,
    pub peak_equity_usd: f64,
    pub open_positions: Vec<Position>,
    pub closed_positions: Vec<Position>,
    pub metrics: PortfolioMetrics,
}

/// Tagged event distributed by the Telemetry & Dashboard Bus. Ephemeral:
/// lifetime is delivery to subscribers, never persisted as an event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PipelineEvent {
    NewCandidate {
        address: String,
        symbol: String,
        source: CandidateSource,
        ts: i64,
    },
    EnrichmentDone {
        address: String,
        completeness: Completeness,
        elapsed_ms: u64,
    },
    DecisionMade {
        address: String,
        recommendation: Recommendation,
        score: f64,
        ts: i64,
    },
    TradeOpened {
        position_id: String,
        address: String,
        size_usd: f64,
        entry_price_usd: f64,
        ts: i64,
    },
    TradeClosed {
        position_id: String,
        address: String,
        reason: CloseReason,
        realized_pnl_usd: f64,
        ts: i64,
    },
    FeeUpdate {
        kind: String,
        value_sol: f64,
        ts: i64,
    },
    PortfolioSnapshot {
        cash_usd: f64,
        equity_usd: f64,
        open_positions: usize,
        ts: i64,
    },
    Error {
        message: String,
        ts: i64,
    },
}

/// Why an intake submission was dropped without starting analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    Dedup,
    Overload,
    QueueFull,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Dedup => "dedup",
            Self::Overload => "overload",
            Self::QueueFull => "queue_full",
        };
        write!(f, "{s}")
    }
}
