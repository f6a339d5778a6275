// =============================================================================
// Rate-Limit / Cache Layer — shared infrastructure for the Enrichment
// Orchestrator
// =============================================================================
//
// Per-provider token-bucket limiters (governor) plus a short-TTL
// (provider, address) cache (dashmap) with stale-while-cooling semantics:
// an expired cache entry may still be served, within a grace window, while
// its provider is in cooldown after a 429.
//
// The snapshot shape is a handful of named numeric counters per provider,
// suitable for the dashboard, generalized from one exchange's weight/order
// counters to an arbitrary set of providers.
// =============================================================================

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket configuration for one provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderLimits {
    pub rps: u32,
    pub burst: u32,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self { rps: 5, burst: 10 }
    }
}

struct CooldownState {
    until: Instant,
    last_backoff: Duration,
}

struct CacheEntry {
    value: Value,
    fetched_at_ms: i64,
    ttl_ms: u64,
}

const MIN_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Per-provider health, exposed on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub rps: u32,
    pub burst: u32,
    pub in_cooldown: bool,
    pub cooldown_remaining_ms: u64,
}

/// Shared rate limiters and short-TTL cache keyed by `(provider, address)`.
pub struct RateLimitCacheLayer {
    limiters: DashMap<String, Arc<Limiter>>,
    limits: DashMap<String, ProviderLimits>,
    cooldowns: DashMap<String, CooldownState>,
    cache: DashMap<(String, String), CacheEntry>,
    default_ttl_ms: u64,
    grace_ms: u64,
}

impl RateLimitCacheLayer {
    pub fn new(default_ttl_ms: u64, grace_ms: u64) -> Self {
        Self {
            limiters: DashMap::new(),
            limits: DashMap::new(),
            cooldowns: DashMap::new(),
            cache: DashMap::new(),
            default_ttl_ms,
            grace_ms,
        }
    }

    /// Register (or re-register) a provider's token-bucket quota. Idempotent
    /// — call once per provider at startup.
    pub fn register_provider(&self, provider: &str, limits: ProviderLimits) {
        let rps = NonZeroU32::new(limits.rps.max(1)).unwrap();
        let burst = NonZeroU32::new(limits.burst.max(1)).unwrap();
        let quota = Quota::per_second(rps).allow_burst(burst);
        self.limiters
            .insert(provider.to_string(), Arc::new(RateLimiter::direct(quota)));
        self.limits.insert(provider.to_string(), limits);
    }

    /// Attempt to admit one request to `provider`. `Ok(())` means send the
    /// request now; `Err(wait)` means the limiter is exhausted and the
    /// caller should treat the fragment as absent if `wait` would blow the
    /// orchestrator deadline.
    pub fn check(&self, provider: &str) -> Result<(), Duration> {
        if self.in_cooldown(provider) {
            return Err(self.cooldown_remaining(provider));
        }

        match self.limiters.get(provider) {
            Some(limiter) => limiter.check().map_err(|not_until| {
                not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
            }),
            // Unregistered providers are treated as unlimited — registration
            // is expected to happen once at startup for every known
            // provider name.
            None => Ok(()),
        }
    }

    /// Record a 429 (or equivalent) from `provider`, entering exponential
    /// backoff cooldown. Cached values keep serving during cooldown.
    pub fn enter_cooldown(&self, provider: &str) {
        let next_backoff = match self.cooldowns.get(provider) {
            Some(state) => (state.last_backoff * 2).min(MAX_BACKOFF),
            None => MIN_BACKOFF,
        };
        warn!(provider = %provider, backoff_ms = next_backoff.as_millis(), "provider entering cooldown");
        self.cooldowns.insert(
            provider.to_string(),
            CooldownState {
                until: Instant::now() + next_backoff,
                last_backoff: next_backoff,
            },
        );
    }

    pub fn in_cooldown(&self, provider: &str) -> bool {
        self.cooldowns
            .get(provider)
            .map(|s| Instant::now() < s.until)
            .unwrap_or(false)
    }

    fn cooldown_remaining(&self, provider: &str) -> Duration {
        self.cooldowns
            .get(provider)
            .map(|s| s.until.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Fetch a cached fragment for `(provider, address)` if it is fresh, or
    /// — when the provider is currently in cooldown — if it is stale but
    /// still within the grace window (stale-while-cooling).
    pub fn cache_get(&self, provider: &str, address: &str, now_ms: i64) -> Option<Value> {
        let key = (provider.to_string(), address.to_string());
        let entry = self.cache.get(&key)?;
        let age_ms = now_ms.saturating_sub(entry.fetched_at_ms) as u64;

        if age_ms <= entry.ttl_ms {
            return Some(entry.value.clone());
        }

        if self.in_cooldown(provider) && age_ms <= entry.ttl_ms + self.grace_ms {
            debug!(provider = %provider, address = %address, "serving stale-while-cooling cache entry");
            return Some(entry.value.clone());
        }

        None
    }

    pub fn cache_put(&self, provider: &str, address: &str, value: Value, now_ms: i64) {
        self.cache.insert(
            (provider.to_string(), address.to_string()),
            CacheEntry {
                value,
                fetched_at_ms: now_ms,
                ttl_ms: self.default_ttl_ms,
            },
        );
    }

    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        self.limits
            .iter()
            .map(|entry| {
                let provider = entry.key().clone();
                let in_cooldown = self.in_cooldown(&provider);
                let cooldown_remaining_ms = if in_cooldown {
                    self.cooldown_remaining(&provider).as_millis() as u64
                } else {
                    0
                };
                ProviderHealth {
                    provider,
                    rps: entry.value().rps,
                    burst: entry.value().burst,
                    in_cooldown,
                    cooldown_remaining_ms,
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_provider_is_unlimited() {
        let layer = RateLimitCacheLayer::new(30_000, 15_000);
        assert!(layer.check("ghost").is_ok());
    }

    #[test]
    fn registered_provider_throttles_past_burst() {
        let layer = RateLimitCacheLayer::new(30_000, 15_000);
        layer.register_provider("security", ProviderLimits { rps: 1, burst: 1 });
        assert!(layer.check("security").is_ok());
        assert!(layer.check("security").is_err());
    }

    #[test]
    fn cooldown_blocks_checks_even_with_tokens_available() {
        let layer = RateLimitCacheLayer::new(30_000, 15_000);
        layer.register_provider("market", ProviderLimits { rps: 100, burst: 100 });
        layer.enter_cooldown("market");
        assert!(layer.check("market").is_err());
    }

    #[test]
    fn cache_serves_fresh_entries() {
        let layer = RateLimitCacheLayer::new(30_000, 15_000);
        layer.cache_put("market", "A1", serde_json::json!({"price": 1.0}), 0);
        assert!(layer.cache_get("market", "A1", 10_000).is_some());
    }

    #[test]
    fn cache_expires_without_cooldown() {
        let layer = RateLimitCacheLayer::new(1_000, 500);
        layer.cache_put("market", "A1", serde_json::json!({"price": 1.0}), 0);
        assert!(layer.cache_get("market", "A1", 5_000).is_none());
    }

    #[test]
    fn cache_serves_stale_during_cooldown_grace() {
        let layer = RateLimitCacheLayer::new(1_000, 2_000);
        layer.cache_put("market", "A1", serde_json::json!({"price": 1.0}), 0);
        layer.enter_cooldown("market");
        // ttl=1000, grace=2000: age 2000 is past ttl but within grace.
        assert!(layer.cache_get("market", "A1", 2_000).is_some());
        // age 4000 is beyond ttl + grace.
        assert!(layer.cache_get("market", "A1", 4_000).is_none());
    }

    #[test]
    fn snapshot_reports_registered_providers() {
        let layer = RateLimitCacheLayer::new(30_000, 15_000);
        layer.register_provider("holders", ProviderLimits { rps: 3, burst: 5 });
        let snap = layer.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].provider, "holders");
        assert!(!snap[0].in_cooldown);
    }
}
