// =============================================================================
// Enrichment Orchestrator — deadline-bounded parallel provider fan-out
// =============================================================================
//
// Fans a candidate out to every enabled provider concurrently and assembles
// whatever fragments answered before the overall deadline: "wait until the
// deadline, keep whatever arrived" rather than "wait for everything". Each
// provider call is additionally bounded by its own per-provider timeout so a
// single hung upstream can't eat the whole budget from its neighbours.
//
// No provider is represented as a trait object — providers are fanned out as
// plain concrete-client futures polled concurrently inside a
// `FuturesUnordered`.
// =============================================================================

mod providers;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::indicators::{bollinger::calculate_bollinger, ema::calculate_ema, rsi::calculate_rsi};
use crate::ratelimit::{ProviderLimits, RateLimitCacheLayer};
use crate::runtime_config::RuntimeConfig;
use crate::types::{
    Completeness, EnrichmentBundle, FlowFragment, MarketFragment, ReasonTag, SecurityFragment,
    SocialFragment, TokenCandidate, TradersFragment,
};

pub use providers::{ProviderClient, ProviderError, ProviderRole};

const ALL_ROLES: [ProviderRole; 5] = [
    ProviderRole::Security,
    ProviderRole::Market,
    ProviderRole::Holders,
    ProviderRole::Creator,
    ProviderRole::Flow,
];

/// Capped ring of recent `price_usd` samples per address, fed by the market
/// provider's response. Momentum is computed locally from whatever is in
/// here rather than fetched — most brand-new tokens will have a single
/// sample and momentum stays `None`, consistent with the "if available"
/// treatment of the momentum fragment.
struct PriceHistoryStore {
    series: DashMap<String, Mutex<VecDeque<f64>>>,
    capacity: usize,
}

impl PriceHistoryStore {
    fn new(capacity: usize) -> Self {
        Self {
            series: DashMap::new(),
            capacity,
        }
    }

    fn record(&self, address: &str, price: f64) {
        let entry = self
            .series
            .entry(address.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.capacity)));
        let mut buf = entry.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(price);
    }

    fn snapshot(&self, address: &str) -> Vec<f64> {
        self.series
            .get(address)
            .map(|buf| buf.lock().iter().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SecurityPayload {
    is_honeypot: Option<bool>,
    is_open_source: Option<bool>,
    is_mintable: Option<bool>,
    transfer_pausable: Option<bool>,
    slippage_modifiable: Option<bool>,
    cooldown: Option<bool>,
    creator_rug_count: Option<u32>,
    lp_burned: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreatorPayload {
    rug_count: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MarketPayload {
    price_usd: Option<f64>,
    liquidity_usd: Option<f64>,
    volume_1h: Option<f64>,
    volume_6h: Option<f64>,
    volume_24h: Option<f64>,
    price_change_1h: Option<f64>,
    price_change_6h: Option<f64>,
    price_change_24h: Option<f64>,
    market_cap: Option<f64>,
    holders: Option<u64>,
    holder_growth_per_min: Option<f64>,
    has_twitter: Option<bool>,
    has_telegram: Option<bool>,
    has_website: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TradersPayload {
    active_count: Option<u64>,
    whale_count: Option<u64>,
    sniper_count: Option<u64>,
    insider_ratio: Option<f64>,
    bundler_ratio: Option<f64>,
    profitable_ratio: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FlowPayload {
    buy_flows: Option<f64>,
    sell_flows: Option<f64>,
    whale_flows: Option<f64>,
    top_holder_concentration_pct: Option<f64>,
}

pub struct EnrichmentOrchestrator {
    client: ProviderClient,
    ratelimit: Arc<RateLimitCacheLayer>,
    deadline: Duration,
    provider_timeout: Duration,
    enabled_roles: Vec<ProviderRole>,
    enable_momentum: bool,
    price_history: PriceHistoryStore,
}

impl EnrichmentOrchestrator {
    pub fn new(cfg: &RuntimeConfig, ratelimit: Arc<RateLimitCacheLayer>) -> Self {
        let client = ProviderClient::new(cfg.provider_base_url.clone(), cfg.provider_auth_token.as_deref());

        let enabled_roles: Vec<ProviderRole> = ALL_ROLES
            .into_iter()
            .filter(|role| match role {
                ProviderRole::Security => cfg.enable_security_provider,
                ProviderRole::Market => cfg.enable_market_provider,
                ProviderRole::Holders => cfg.enable_holders_provider,
                ProviderRole::Creator => cfg.enable_creator_provider,
                ProviderRole::Flow => cfg.enable_flow_provider,
            })
            .collect();

        for role in &enabled_roles {
            ratelimit.register_provider(role.name(), ProviderLimits::default());
        }

        Self {
            client,
            ratelimit,
            deadline: Duration::from_millis(cfg.enrichment_deadline_ms),
            provider_timeout: Duration::from_millis(cfg.provider_timeout_ms),
            enabled_roles,
            enable_momentum: cfg.enable_momentum_provider,
            price_history: PriceHistoryStore::new(64),
        }
    }

    /// Assemble an [`EnrichmentBundle`] for `candidate`, waiting no longer
    /// than the configured deadline. Providers that answer before the
    /// deadline are folded in as they complete; providers still outstanding
    /// when the deadline elapses are recorded as absent with
    /// [`ReasonTag::DeadlineExceeded`] and dropped — their futures are not
    /// polled again after this call returns.
    #[instrument(skip(self, candidate), fields(address = %candidate.address))]
    pub async fn enrich(&self, candidate: &TokenCandidate) -> EnrichmentBundle {
        let mut bundle = EnrichmentBundle {
            address: candidate.address.clone(),
            ..Default::default()
        };

        let mut outstanding: HashSet<ProviderRole> = self.enabled_roles.iter().copied().collect();

        let mut pending: FuturesUnordered<_> = self
            .enabled_roles
            .iter()
            .map(|role| self.fetch_one(*role, &candidate.address))
            .collect();

        let deadline_sleep = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline_sleep);

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline_sleep => break,
                next = pending.next() => {
                    match next {
                        Some((role, outcome, elapsed)) => {
                            outstanding.remove(&role);
                            bundle
                                .fetch_latencies_ms
                                .insert(role.name().to_string(), elapsed.as_millis() as u64);
                            self.apply_outcome(&mut bundle, role, outcome);
                        }
                        None => break,
                    }
                }
            }
        }

        // Anything still outstanding at the deadline (or, rarely, orphaned
        // when `pending` drains early) is absent with a typed reason —
        // never silently dropped.
        for _role in &outstanding {
            bundle.reasons.push(ReasonTag::DeadlineExceeded);
        }

        if self.enable_momentum {
            self.apply_momentum(&mut bundle);
        }

        bundle
    }

    async fn fetch_one(
        &self,
        role: ProviderRole,
        address: &str,
    ) -> (ProviderRole, Result<Value, ProviderError>, Duration) {
        let start = Instant::now();
        let now_ms = chrono::Utc::now().timestamp_millis();

        if let Some(cached) = self.ratelimit.cache_get(role.name(), address, now_ms) {
            return (role, Ok(cached), start.elapsed());
        }

        if self.ratelimit.check(role.name()).is_err() {
            return (role, Err(ProviderError::RateLimited), start.elapsed());
        }

        let outcome = match tokio::time::timeout(self.provider_timeout, self.client.fetch(role, address)).await {
            Ok(Ok(value)) => {
                self.ratelimit.cache_put(role.name(), address, value.clone(), now_ms);
                Ok(value)
            }
            Ok(Err(ProviderError::RateLimited)) => {
                self.ratelimit.enter_cooldown(role.name());
                Err(ProviderError::RateLimited)
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(ProviderError::Timeout),
        };

        (role, outcome, start.elapsed())
    }

    fn apply_outcome(&self, bundle: &mut EnrichmentBundle, role: ProviderRole, outcome: Result<Value, ProviderError>) {
        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                bundle.reasons.push(reason_for(err));
                return;
            }
        };

        match role {
            ProviderRole::Security => match serde_json::from_value::<SecurityPayload>(value) {
                Ok(p) => {
                    bundle.security = SecurityFragment {
                        is_honeypot: p.is_honeypot,
                        is_open_source: p.is_open_source,
                        is_mintable: p.is_mintable,
                        transfer_pausable: p.transfer_pausable,
                        slippage_modifiable: p.slippage_modifiable,
                        cooldown: p.cooldown,
                        creator_rug_count: p.creator_rug_count.or(bundle.security.creator_rug_count),
                        lp_burned: p.lp_burned,
                    };
                    bundle.completeness.security = true;
                }
                Err(_) => bundle.reasons.push(ReasonTag::ProviderDecodeError),
            },
            ProviderRole::Market => match serde_json::from_value::<MarketPayload>(value) {
                Ok(p) => {
                    if let Some(price) = p.price_usd {
                        self.price_history.record(&bundle.address, price);
                    }
                    bundle.market = MarketFragment {
                        price_usd: p.price_usd,
                        liquidity_usd: p.liquidity_usd,
                        volume_1h: p.volume_1h,
                        volume_6h: p.volume_6h,
                        volume_24h: p.volume_24h,
                        price_change_1h: p.price_change_1h,
                        price_change_6h: p.price_change_6h,
                        price_change_24h: p.price_change_24h,
                        market_cap: p.market_cap,
                        holders: p.holders,
                        holder_growth_per_min: p.holder_growth_per_min,
                    };
                    bundle.social = SocialFragment {
                        has_twitter: p.has_twitter.unwrap_or(false),
                        has_telegram: p.has_telegram.unwrap_or(false),
                        has_website: p.has_website.unwrap_or(false),
                    };
                    bundle.completeness.market = true;
                    bundle.completeness.social = true;
                }
                Err(_) => bundle.reasons.push(ReasonTag::ProviderDecodeError),
            },
            ProviderRole::Holders => match serde_json::from_value::<TradersPayload>(value) {
                Ok(p) => {
                    bundle.traders = TradersFragment {
                        active_count: p.active_count,
                        whale_count: p.whale_count,
                        sniper_count: p.sniper_count,
                        insider_ratio: p.insider_ratio,
                        bundler_ratio: p.bundler_ratio,
                        profitable_ratio: p.profitable_ratio,
                    };
                    bundle.completeness.traders = true;
                }
                Err(_) => bundle.reasons.push(ReasonTag::ProviderDecodeError),
            },
            ProviderRole::Creator => match serde_json::from_value::<CreatorPayload>(value) {
                Ok(p) => {
                    if p.rug_count.is_some() {
                        bundle.security.creator_rug_count = p.rug_count;
                    }
                }
                Err(_) => bundle.reasons.push(ReasonTag::ProviderDecodeError),
            },
            ProviderRole::Flow => match serde_json::from_value::<FlowPayload>(value) {
                Ok(p) => {
                    bundle.flow = FlowFragment {
                        buy_flows: p.buy_flows,
                        sell_flows: p.sell_flows,
                        whale_flows: p.whale_flows,
                        top_holder_concentration_pct: p.top_holder_concentration_pct,
                    };
                    bundle.completeness.flow = true;
                }
                Err(_) => bundle.reasons.push(ReasonTag::ProviderDecodeError),
            },
        }
    }

    fn apply_momentum(&self, bundle: &mut EnrichmentBundle) {
        let series = self.price_history.snapshot(&bundle.address);

        let rsi = calculate_rsi(&series, 14).last().copied();

        let macd_signal = {
            let fast = calculate_ema(&series, 12);
            let slow = calculate_ema(&series, 26);
            match (fast.last(), slow.last()) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            }
        };

        let bollinger_position = calculate_bollinger(&series, 20, 2.0).map(|b| {
            let span = (b.upper - b.lower).max(f64::EPSILON);
            ((series.last().copied().unwrap_or(b.middle) - b.lower) / span).clamp(0.0, 1.0)
        });

        let volume_spike = match (bundle.market.volume_1h, bundle.market.volume_6h) {
            (Some(v1h), Some(v6h)) if v6h > 0.0 => Some(v1h > (v6h / 6.0) * 3.0),
            _ => None,
        };

        if rsi.is_some() || macd_signal.is_some() || bollinger_position.is_some() || volume_spike.is_some() {
            bundle.completeness.momentum = true;
        }

        bundle.momentum.rsi = rsi;
        bundle.momentum.macd_signal = macd_signal;
        bundle.momentum.bollinger_position = bollinger_position;
        bundle.momentum.volume_spike = volume_spike;
    }
}

fn reason_for(err: ProviderError) -> ReasonTag {
    match err {
        ProviderError::Timeout => ReasonTag::ProviderTimeout,
        ProviderError::RateLimited => ReasonTag::ProviderRateLimited,
        ProviderError::AuthError => ReasonTag::ProviderAuthError,
        ProviderError::DecodeError => ReasonTag::ProviderDecodeError,
        ProviderError::Unavailable => ReasonTag::ProviderUnavailable,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateSource;

    fn candidate(address: &str) -> TokenCandidate {
        TokenCandidate {
            address: address.to_string(),
            symbol: "TST".to_string(),
            name: "Test Token".to_string(),
            first_seen_at: 0,
            initial_liquidity_usd: 5_000.0,
            initial_price_usd: Some(0.001),
            source: CandidateSource::NewPairs,
        }
    }

    #[test]
    fn price_history_caps_and_orders_samples() {
        let store = PriceHistoryStore::new(3);
        store.record("A1", 1.0);
        store.record("A1", 2.0);
        store.record("A1", 3.0);
        store.record("A1", 4.0);
        assert_eq!(store.snapshot("A1"), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn unknown_address_has_empty_history() {
        let store = PriceHistoryStore::new(8);
        assert!(store.snapshot("ghost").is_empty());
    }

    #[tokio::test]
    async fn disabled_providers_are_never_called() {
        let mut cfg = RuntimeConfig::default();
        cfg.enable_security_provider = false;
        cfg.enable_market_provider = false;
        cfg.enable_holders_provider = false;
        cfg.enable_creator_provider = false;
        cfg.enable_flow_provider = false;
        cfg.enable_momentum_provider = false;
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);

        let bundle = orchestrator.enrich(&candidate("A1")).await;

        assert!(!bundle.completeness.security);
        assert!(!bundle.completeness.market);
        assert!(!bundle.completeness.momentum);
        assert!(bundle.reasons.is_empty());
    }

    #[tokio::test]
    async fn unreachable_base_url_marks_every_enabled_role_absent_with_reasons() {
        let mut cfg = RuntimeConfig::default();
        cfg.provider_base_url = "http://127.0.0.1:1".to_string(); // nothing listens here
        cfg.enrichment_deadline_ms = 500;
        cfg.provider_timeout_ms = 400;
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);

        let bundle = orchestrator.enrich(&candidate("A1")).await;

        assert!(!bundle.completeness.security);
        assert!(!bundle.completeness.market);
        assert!(!bundle.reasons.is_empty());
    }

    /// Accepts TCP connections and never writes a response, so whatever
    /// reads from it hangs until its caller's own timeout fires.
    async fn spawn_silent_listener() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    use tokio::io::AsyncReadExt;
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn deadline_exceeded_is_tagged_for_roles_still_pending_when_deadline_fires() {
        // Every enabled role hangs past the orchestrator deadline but well
        // short of its own per-provider timeout, so this can only resolve
        // through the deadline `break` arm of `enrich`, not the individual
        // provider-timeout branch.
        let port = spawn_silent_listener().await;

        let mut cfg = RuntimeConfig::default();
        cfg.provider_base_url = format!("http://127.0.0.1:{port}");
        cfg.enrichment_deadline_ms = 150;
        cfg.provider_timeout_ms = 5_000;
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);

        let started = Instant::now();
        let bundle = orchestrator.enrich(&candidate("A1")).await;

        assert!(
            started.elapsed() < Duration::from_secs(1),
            "enrich() should return at the orchestrator deadline, not the provider timeout"
        );
        assert!(!bundle.completeness.security);
        assert!(!bundle.completeness.market);
        let deadline_tags = bundle
            .reasons
            .iter()
            .filter(|r| **r == ReasonTag::DeadlineExceeded)
            .count();
        assert_eq!(deadline_tags, ALL_ROLES.len());
    }

    /// Scenario F (spec.md §8): D=2000ms; security=300ms OK; market=1900ms
    /// OK; holders and creator both still outstanding when the deadline
    /// fires. Completeness bits for holders/creator must be 0; security and
    /// market must be populated.
    #[tokio::test]
    async fn scenario_f_partial_enrichment_under_deadline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle_scenario_f_connection(socket));
            }
        });

        let mut cfg = RuntimeConfig::default();
        cfg.provider_base_url = format!("http://127.0.0.1:{port}");
        cfg.enrichment_deadline_ms = 2_000;
        // Above D on purpose: holders/creator must be cut off by the
        // orchestrator deadline itself, not an individual provider timeout.
        cfg.provider_timeout_ms = 2_500;
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);

        let bundle = orchestrator.enrich(&candidate("A1")).await;

        assert!(bundle.completeness.security);
        assert!(bundle.completeness.market);
        assert!(!bundle.completeness.traders);
        assert!(bundle.completeness.flow); // responds immediately, well inside D
        let deadline_tags = bundle
            .reasons
            .iter()
            .filter(|r| **r == ReasonTag::DeadlineExceeded)
            .count();
        assert_eq!(deadline_tags, 2); // holders, creator
    }

    /// Reads a bare HTTP/1.1 request line off `socket`, delays according to
    /// the requested path, then writes a minimal JSON 200 response — except
    /// for `/holders/...`, which never responds at all.
    async fn handle_scenario_f_connection(mut socket: tokio::net::TcpStream) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut buf = [0u8; 1024];
        let n = match socket.read(&mut buf).await {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        let request = String::from_utf8_lossy(&buf[..n]);
        let path = request.lines().next().unwrap_or("").to_string();

        if path.contains("/holders/") {
            // Never respond: this role only ever resolves via timeout.
            tokio::time::sleep(Duration::from_secs(30)).await;
            return;
        }

        let delay_ms = if path.contains("/security/") {
            300
        } else if path.contains("/market/") {
            1_900
        } else if path.contains("/creator-history/") {
            2_100
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let body = "{}";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
    }

    #[tokio::test]
    async fn rate_limited_role_is_absent_and_enters_cooldown() {
        let cfg = RuntimeConfig::default();
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        ratelimit.register_provider("security", ProviderLimits { rps: 1, burst: 1 });
        // Exhaust the bucket before the orchestrator ever calls it.
        assert!(ratelimit.check("security").is_ok());

        let mut cfg = cfg;
        cfg.enable_market_provider = false;
        cfg.enable_holders_provider = false;
        cfg.enable_creator_provider = false;
        cfg.enable_flow_provider = false;
        cfg.enable_momentum_provider = false;
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit.clone());

        let bundle = orchestrator.enrich(&candidate("A1")).await;

        assert!(!bundle.completeness.security);
        assert!(bundle.reasons.contains(&ReasonTag::ProviderRateLimited));
        assert!(ratelimit.in_cooldown("security"));
    }

    #[test]
    fn momentum_is_none_with_a_single_price_sample() {
        let cfg = RuntimeConfig::default();
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);
        orchestrator.price_history.record("A1", 0.001);

        let mut bundle = EnrichmentBundle {
            address: "A1".to_string(),
            ..Default::default()
        };
        orchestrator.apply_momentum(&mut bundle);

        assert!(bundle.momentum.rsi.is_none());
        assert!(bundle.momentum.bollinger_position.is_none());
        assert!(!bundle.completeness.momentum);
    }

    #[test]
    fn momentum_computes_once_enough_history_accumulates() {
        let cfg = RuntimeConfig::default();
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);
        for i in 0..30 {
            orchestrator.price_history.record("A1", 1.0 + i as f64 * 0.01);
        }

        let mut bundle = EnrichmentBundle {
            address: "A1".to_string(),
            ..Default::default()
        };
        orchestrator.apply_momentum(&mut bundle);

        assert!(bundle.momentum.rsi.is_some());
        assert!(bundle.momentum.bollinger_position.is_some());
        assert!(bundle.completeness.momentum);
    }

    #[test]
    fn volume_spike_detected_from_market_fragment_ratio() {
        let cfg = RuntimeConfig::default();
        let ratelimit = Arc::new(RateLimitCacheLayer::new(cfg.cache_ttl_ms, cfg.cache_grace_ms));
        let orchestrator = EnrichmentOrchestrator::new(&cfg, ratelimit);

        let mut bundle = EnrichmentBundle {
            address: "A1".to_string(),
            ..Default::default()
        };
        bundle.market.volume_1h = Some(10_000.0);
        bundle.market.volume_6h = Some(6_000.0); // avg/h = 1000, 1h volume is 10x that
        orchestrator.apply_momentum(&mut bundle);

        assert_eq!(bundle.momentum.volume_spike, Some(true));
    }
}
