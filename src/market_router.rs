// =============================================================================
// Market Data Router — price ticks, only for addresses with open positions
// =============================================================================
//
// Subscribes to the Shared Socket Fabric's `b-<address>` room per address
// as positions open and close, rather than a fixed symbol list polled on an
// interval.
// Delivery is at-most-once per (address, ts): a `DashMap` tracks the last
// timestamp forwarded per address so a duplicate or out-of-order replay of
// the same tick never reaches the Paper-Trading Engine twice.
// =============================================================================

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::adapters::{parse_envelope, UpstreamEvent};
use crate::fabric::{FabricOptions, SocketFabric};
use crate::paper_trading::PaperTradingHandle;

pub struct MarketDataRouter {
    fabric: Arc<SocketFabric>,
    upstream_url: String,
    /// address -> last MarketTick.ts delivered downstream.
    tracked: DashMap<String, i64>,
}

impl MarketDataRouter {
    pub fn new(fabric: Arc<SocketFabric>, upstream_url: String) -> Self {
        Self {
            fabric,
            upstream_url,
            tracked: DashMap::new(),
        }
    }

    /// Begin routing ticks for `address` — called when a position opens.
    pub fn track(&self, address: &str) {
        if self.tracked.insert(address.to_string(), i64::MIN).is_none() {
            let conn = self
                .fabric
                .get_shared_connection(&self.upstream_url, FabricOptions::default());
            conn.send(subscribe_payload(address));
            debug!(address, "market data router subscribed");
        }
    }

    /// Stop routing ticks for `address` — called when a position closes.
    pub fn untrack(&self, address: &str) {
        if self.tracked.remove(address).is_some() {
            let conn = self
                .fabric
                .get_shared_connection(&self.upstream_url, FabricOptions::default());
            conn.send(unsubscribe_payload(address));
            debug!(address, "market data router unsubscribed");
        }
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.tracked.contains_key(address)
    }

    /// Drive the router off the shared upstream connection until it closes.
    /// Spawn this once; it runs for the process lifetime.
    pub async fn run(self: Arc<Self>, trading: PaperTradingHandle) {
        let conn = self
            .fabric
            .get_shared_connection(&self.upstream_url, FabricOptions::default());
        let mut sub = conn.subscribe();

        while let Some(msg) = sub.recv().await {
            let Some(decoded) = &msg.decoded else {
                continue;
            };
            let Ok(events) = parse_envelope(decoded) else {
                continue;
            };
            for event in events {
                let UpstreamEvent::MarketTick(tick) = event else {
                    continue;
                };
                let Some(mut last_ts) = self.tracked.get_mut(&tick.address) else {
                    continue;
                };
                if tick.ts <= *last_ts {
                    continue; // duplicate or out-of-order — already delivered
                }
                *last_ts = tick.ts;
                drop(last_ts);
                trading.on_tick(tick).await;
            }
        }
    }
}

fn subscribe_payload(address: &str) -> String {
    serde_json::json!({ "action": "subscribe", "room": format!("b-{address}") }).to_string()
}

fn unsubscribe_payload(address: &str) -> String {
    serde_json::json!({ "action": "unsubscribe", "room": format!("b-{address}") }).to_string()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_then_untrack_clears_state() {
        let fabric = Arc::new(SocketFabric::new());
        let router = MarketDataRouter::new(fabric, "wss://upstream.example/ws".to_string());
        router.track("A1");
        assert!(router.is_tracked("A1"));
        router.untrack("A1");
        assert!(!router.is_tracked("A1"));
    }

    #[test]
    fn tracking_twice_does_not_resubscribe() {
        let fabric = Arc::new(SocketFabric::new());
        let router = MarketDataRouter::new(fabric, "wss://upstream.example/ws".to_string());
        router.track("A1");
        router.track("A1");
        assert_eq!(router.tracked.len(), 1);
    }
}
