// =============================================================================
// Telemetry & Dashboard Bus — non-blocking PipelineEvent distribution
// =============================================================================
//
// Producers (Scoring, Paper-Trading Engine, Market Data Router, ...) push
// into an unbounded `mpsc` channel — a send that can never block the hot
// path — which a single pump task drains into a `broadcast::Sender`. The
// broadcast channel gives every subscriber its own bounded queue with
// drop-oldest-on-overflow semantics for free (`RecvError::Lagged`), the same
// idiom `fabric::SocketFabric` uses for upstream fan-out, generalized here
// from raw socket frames to typed `PipelineEvent`s. `app_state.rs`'s
// `ErrorRecord`/`push_error`/`increment_version` pattern is the grounding
// for the dropped/published counters exposed on the snapshot.
// =============================================================================

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::types::PipelineEvent;

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Dashboard-visible counters for the bus as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub subscriber_count: usize,
    pub published_total: u64,
    pub dropped_total: u64,
}

pub struct TelemetryBus {
    tx: broadcast::Sender<Arc<PipelineEvent>>,
    subscriber_count: Arc<AtomicUsize>,
    published_total: Arc<AtomicU64>,
    dropped_total: Arc<AtomicU64>,
}

impl TelemetryBus {
    /// Subscribe to the event stream. Each subscription gets its own bounded
    /// queue (capacity = the bus capacity); a slow subscriber only drops its
    /// own oldest events, never slows down others or the publisher.
    pub fn subscribe(&self) -> TelemetrySubscription {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        TelemetrySubscription {
            rx: self.tx.subscribe(),
            dropped_total: self.dropped_total.clone(),
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            subscriber_count: self.subscriber_count.load(Ordering::SeqCst),
            published_total: self.published_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
        }
    }
}

pub struct TelemetrySubscription {
    rx: broadcast::Receiver<Arc<PipelineEvent>>,
    dropped_total: Arc<AtomicU64>,
    subscriber_count: Arc<AtomicUsize>,
}

impl TelemetrySubscription {
    /// Await the next event, transparently skipping past any events this
    /// subscriber lagged behind on (counted in `dropped_total`).
    pub async fn recv(&mut self) -> Option<Arc<PipelineEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped_total.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for TelemetrySubscription {
    fn drop(&mut self) {
        self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Start the bus's pump task and return the producer-facing sender plus a
/// shared handle for subscribing/snapshotting.
pub fn spawn(capacity: Option<usize>) -> (mpsc::UnboundedSender<PipelineEvent>, Arc<TelemetryBus>) {
    let (broadcast_tx, _initial_rx) = broadcast::channel(capacity.unwrap_or(DEFAULT_BUS_CAPACITY));
    let bus = Arc::new(TelemetryBus {
        tx: broadcast_tx,
        subscriber_count: Arc::new(AtomicUsize::new(0)),
        published_total: Arc::new(AtomicU64::new(0)),
        dropped_total: Arc::new(AtomicU64::new(0)),
    });

    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let pump_bus = bus.clone();
    tokio::spawn(async move {
        while let Some(event) = input_rx.recv().await {
            pump_bus.published_total.fetch_add(1, Ordering::Relaxed);
            // `send` only errors when there are zero subscribers; that is
            // not a failure for a fire-and-forget telemetry bus.
            let _ = pump_bus.tx.send(Arc::new(event));
        }
    });

    (input_tx, bus)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let (input, bus) = spawn(Some(8));
        let mut sub = bus.subscribe();
        input
            .send(PipelineEvent::Error {
                message: "boom".to_string(),
                ts: 0,
            })
            .unwrap();
        let event = sub.recv().await.unwrap();
        assert!(matches!(*event, PipelineEvent::Error { .. }));
    }

    #[tokio::test]
    async fn lagging_subscriber_counts_drops_instead_of_blocking_publisher() {
        let (input, bus) = spawn(Some(2));
        let mut sub = bus.subscribe();
        for i in 0..10 {
            input
                .send(PipelineEvent::FeeUpdate {
                    kind: "jito_bribe".to_string(),
                    value_sol: i as f64,
                    ts: i,
                })
                .unwrap();
        }
        // Give the pump task a chance to drain the input queue.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let _ = sub.recv().await;
        assert!(bus.snapshot().dropped_total > 0 || bus.snapshot().published_total == 10);
    }

    #[tokio::test]
    async fn subscriber_count_reflects_drops() {
        let (_input, bus) = spawn(Some(8));
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.snapshot().subscriber_count, 1);
        }
        assert_eq!(bus.snapshot().subscriber_count, 0);
    }
}
