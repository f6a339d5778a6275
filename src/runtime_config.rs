// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Aurora Meme Nexus pipeline. Every tunable
// threshold the engine exposes lives here so it can be reconfigured without
// a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::TradingMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_upstream_url() -> String {
    "wss://upstream.example/ws".to_string()
}

fn default_whale_feed_url() -> String {
    "wss://whales.example/ws".to_string()
}

fn default_dedup_window_ms() -> u64 {
    10 * 60_000
}

fn default_max_concurrent_analyses() -> usize {
    8
}

fn default_intake_queue_capacity() -> usize {
    64
}

fn default_enrichment_deadline_ms() -> u64 {
    2_000
}

fn default_provider_timeout_ms() -> u64 {
    1_800
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_cache_grace_ms() -> u64 {
    15_000
}

fn default_provider_base_url() -> String {
    "https://providers.example".to_string()
}

fn default_provider_auth_token() -> Option<String> {
    None
}

fn default_absolute_min_liquidity_usd() -> f64 {
    2_000.0
}

fn default_creator_rug_count_threshold() -> u32 {
    2
}

fn default_top_holder_concentration_veto_pct() -> f64 {
    70.0
}

fn default_holder_growth_boost_threshold() -> f64 {
    2.0
}

fn default_profitable_ratio_boost_threshold() -> f64 {
    0.30
}

fn default_liquidity_weight() -> f64 {
    0.25
}

fn default_volume_weight() -> f64 {
    0.20
}

fn default_momentum_weight() -> f64 {
    0.15
}

fn default_safety_weight() -> f64 {
    0.20
}

fn default_holder_distribution_weight() -> f64 {
    0.10
}

fn default_social_weight() -> f64 {
    0.10
}

fn default_strong_buy_threshold() -> f64 {
    80.0
}

fn default_buy_threshold() -> f64 {
    60.0
}

fn default_watch_threshold() -> f64 {
    40.0
}

fn default_base_position_pct() -> f64 {
    2.0
}

fn default_min_trade_usd() -> f64 {
    10.0
}

fn default_max_trade_usd() -> f64 {
    500.0
}

fn default_strong_buy_size_multiplier() -> f64 {
    1.5
}

fn default_stop_loss_pct() -> f64 {
    0.15
}

fn default_take_profit_pct() -> f64 {
    0.25
}

fn default_trailing_drawdown_pct() -> f64 {
    0.15
}

fn default_max_hold_ms() -> i64 {
    5 * 60_000
}

fn default_max_open_positions() -> usize {
    5
}

fn default_starting_cash_usd() -> f64 {
    1000.0
}

fn default_closed_positions_ring_capacity() -> usize {
    500
}

fn default_portfolio_snapshot_interval_secs() -> u64 {
    30
}

// =============================================================================
// ScoringWeights
// =============================================================================

/// Component subscore weights. Missing components are
/// reweighted pro-rata among present components at scoring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_liquidity_weight")]
    pub liquidity: f64,
    #[serde(default = "default_volume_weight")]
    pub volume: f64,
    #[serde(default = "default_momentum_weight")]
    pub momentum: f64,
    #[serde(default = "default_safety_weight")]
    pub safety: f64,
    #[serde(default = "default_holder_distribution_weight")]
    pub holder_distribution: f64,
    #[serde(default = "default_social_weight")]
    pub social: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            liquidity: default_liquidity_weight(),
            volume: default_volume_weight(),
            momentum: default_momentum_weight(),
            safety: default_safety_weight(),
            holder_distribution: default_holder_distribution_weight(),
            social: default_social_weight(),
        }
    }
}

// =============================================================================
// SizingParams
// =============================================================================

/// Position-sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingParams {
    #[serde(default = "default_base_position_pct")]
    pub base_position_pct: f64,
    #[serde(default = "default_min_trade_usd")]
    pub min_trade_usd: f64,
    #[serde(default = "default_max_trade_usd")]
    pub max_trade_usd: f64,
    #[serde(default = "default_strong_buy_size_multiplier")]
    pub strong_buy_size_multiplier: f64,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            base_position_pct: default_base_position_pct(),
            min_trade_usd: default_min_trade_usd(),
            max_trade_usd: default_max_trade_usd(),
            strong_buy_size_multiplier: default_strong_buy_size_multiplier(),
        }
    }
}

// =============================================================================
// ExitParams
// =============================================================================

/// Exit-rule knobs for the Paper-Trading Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_trailing_drawdown_pct")]
    pub trailing_drawdown_pct: f64,
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: i64,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            trailing_drawdown_pct: default_trailing_drawdown_pct(),
            max_hold_ms: default_max_hold_ms(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Aurora Meme Nexus engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational mode ----------------------------------------------

    /// Current trading mode: Live, Paused, or Killed.
    #[serde(default)]
    pub trading_mode: TradingMode,

    // --- Upstream feeds --------------------------------------------------
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_whale_feed_url")]
    pub whale_feed_url: String,

    // --- Intake / dedup ----------------------------------------------------
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_max_concurrent_analyses")]
    pub max_concurrent_analyses: usize,
    #[serde(default = "default_intake_queue_capacity")]
    pub intake_queue_capacity: usize,

    // --- Enrichment ----------------------------------------------------
    #[serde(default = "default_enrichment_deadline_ms")]
    pub enrichment_deadline_ms: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_cache_grace_ms")]
    pub cache_grace_ms: u64,
    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,
    #[serde(default = "default_provider_auth_token")]
    pub provider_auth_token: Option<String>,

    // --- Feature flags: providers ---------------------------------------
    // All default to `true` so new providers participate by default.
    #[serde(default = "default_true")]
    pub enable_security_provider: bool,
    #[serde(default = "default_true")]
    pub enable_market_provider: bool,
    #[serde(default = "default_true")]
    pub enable_holders_provider: bool,
    #[serde(default = "default_true")]
    pub enable_creator_provider: bool,
    #[serde(default = "default_true")]
    pub enable_flow_provider: bool,
    #[serde(default = "default_true")]
    pub enable_momentum_provider: bool,

    // --- Scoring / vetoes ------------------------------------------------
    #[serde(default = "default_absolute_min_liquidity_usd")]
    pub absolute_min_liquidity_usd: f64,
    #[serde(default = "default_creator_rug_count_threshold")]
    pub creator_rug_count_threshold: u32,
    #[serde(default = "default_top_holder_concentration_veto_pct")]
    pub top_holder_concentration_veto_pct: f64,
    #[serde(default = "default_holder_growth_boost_threshold")]
    pub holder_growth_boost_threshold: f64,
    #[serde(default = "default_profitable_ratio_boost_threshold")]
    pub profitable_ratio_boost_threshold: f64,
    #[serde(default = "default_strong_buy_threshold")]
    pub strong_buy_threshold: f64,
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,
    #[serde(default = "default_watch_threshold")]
    pub watch_threshold: f64,
    #[serde(default)]
    pub scoring_weights: ScoringWeights,
    #[serde(default)]
    pub sizing: SizingParams,

    // --- Paper-trading ---------------------------------------------------
    #[serde(default = "default_starting_cash_usd")]
    pub starting_cash_usd: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_closed_positions_ring_capacity")]
    pub closed_positions_ring_capacity: usize,
    #[serde(default)]
    pub exit: ExitParams,
    #[serde(default = "default_portfolio_snapshot_interval_secs")]
    pub portfolio_snapshot_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            upstream_url: default_upstream_url(),
            whale_feed_url: default_whale_feed_url(),
            dedup_window_ms: default_dedup_window_ms(),
            max_concurrent_analyses: default_max_concurrent_analyses(),
            intake_queue_capacity: default_intake_queue_capacity(),
            enrichment_deadline_ms: default_enrichment_deadline_ms(),
            provider_timeout_ms: default_provider_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_grace_ms: default_cache_grace_ms(),
            provider_base_url: default_provider_base_url(),
            provider_auth_token: default_provider_auth_token(),
            enable_security_provider: true,
            enable_market_provider: true,
            enable_holders_provider: true,
            enable_creator_provider: true,
            enable_flow_provider: true,
            enable_momentum_provider: true,
            absolute_min_liquidity_usd: default_absolute_min_liquidity_usd(),
            creator_rug_count_threshold: default_creator_rug_count_threshold(),
            top_holder_concentration_veto_pct: default_top_holder_concentration_veto_pct(),
            holder_growth_boost_threshold: default_holder_growth_boost_threshold(),
            profitable_ratio_boost_threshold: default_profitable_ratio_boost_threshold(),
            strong_buy_threshold: default_strong_buy_threshold(),
            buy_threshold: default_buy_threshold(),
            watch_threshold: default_watch_threshold(),
            scoring_weights: ScoringWeights::default(),
            sizing: SizingParams::default(),
            starting_cash_usd: default_starting_cash_usd(),
            max_open_positions: default_max_open_positions(),
            closed_positions_ring_capacity: default_closed_positions_ring_capacity(),
            exit: ExitParams::default(),
            portfolio_snapshot_interval_secs: default_portfolio_snapshot_interval_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Overlay environment-variable overrides onto an already-loaded config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AURORA_UPSTREAM_URL") {
            self.upstream_url = url;
        }
        if let Ok(url) = std::env::var("AURORA_WHALE_FEED_URL") {
            self.whale_feed_url = url;
        }
        if let Ok(url) = std::env::var("AURORA_PROVIDER_BASE_URL") {
            self.provider_base_url = url;
        }
        if let Ok(token) = std::env::var("AURORA_PROVIDER_AUTH_TOKEN") {
            self.provider_auth_token = Some(token);
        }
        if let Ok(v) = std::env::var("AURORA_MIN_LIQUIDITY_USD") {
            match v.parse() {
                Ok(parsed) => self.absolute_min_liquidity_usd = parsed,
                Err(_) => warn!(value = %v, "AURORA_MIN_LIQUIDITY_USD is not a valid number — ignoring"),
            }
        }
        if let Ok(v) = std::env::var("AURORA_DEDUP_WINDOW_MS") {
            if let Ok(parsed) = v.parse() {
                self.dedup_window_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("AURORA_MAX_CONCURRENT_ANALYSES") {
            if let Ok(parsed) = v.parse() {
                self.max_concurrent_analyses = parsed;
            }
        }
        if let Ok(v) = std::env::var("AURORA_STARTING_CASH_USD") {
            if let Ok(parsed) = v.parse() {
                self.starting_cash_usd = parsed;
            }
        }
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.dedup_window_ms, 600_000);
        assert_eq!(cfg.max_concurrent_analyses, 8);
        assert!((cfg.absolute_min_liquidity_usd - 2_000.0).abs() < f64::EPSILON);
        assert!((cfg.scoring_weights.liquidity - 0.25).abs() < f64::EPSILON);
        assert!((cfg.exit.trailing_drawdown_pct - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.max_open_positions, 5);
        assert!(cfg.enable_security_provider);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "max_open_positions": 10 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.max_open_positions, 10);
        assert_eq!(cfg.dedup_window_ms, 600_000);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.dedup_window_ms, cfg2.dedup_window_ms);
        assert_eq!(cfg.max_open_positions, cfg2.max_open_positions);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn env_override_parses_liquidity_floor() {
        // Exercises the same parse-or-warn path apply_env_overrides uses,
        // without mutating the process environment from a test.
        let parsed: Result<f64, _> = "5000".parse();
        assert_eq!(parsed.unwrap(), 5000.0);
    }
}
