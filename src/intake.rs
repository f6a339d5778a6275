// =============================================================================
// Token Intake & Deduper — canonicalize and bound concurrent analysis
// =============================================================================
//
// Ensures each token address is analyzed at most once per sliding window and
// that the number of in-flight enrichment tasks never exceeds the configured
// budget. The dedup map is a concurrent-readable `DashMap` (no single lock
// to contend on the hot ingestion path), the same style `dashmap` brings to
// the Rate-Limit/Cache Layer.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::types::{DropReason, TokenCandidate};

/// One candidate queued for the Enrichment Orchestrator.
#[derive(Debug, Clone)]
pub struct EnrichmentTask {
    pub candidate: TokenCandidate,
    pub enqueued_at: i64,
}

/// Bounded, drop-oldest FIFO for [`EnrichmentTask`]s awaiting enrichment.
struct TaskQueue {
    inner: Mutex<VecDeque<EnrichmentTask>>,
    capacity: usize,
    notify: Notify,
}

impl TaskQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Push a task, dropping the oldest queued task if at capacity. Returns
    /// `true` if an older task was evicted to make room.
    fn push(&self, task: EnrichmentTask) -> bool {
        let mut q = self.inner.lock();
        let evicted = if q.len() >= self.capacity {
            q.pop_front();
            true
        } else {
            false
        };
        q.push_back(task);
        drop(q);
        self.notify.notify_one();
        evicted
    }

    async fn pop(&self) -> EnrichmentTask {
        loop {
            if let Some(task) = self.inner.lock().pop_front() {
                return task;
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Snapshot of intake health for the dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntakeSnapshot {
    pub in_flight: usize,
    pub queued: usize,
    pub tracked_addresses: usize,
    pub dropped_dedup: u64,
    pub dropped_overload: u64,
    pub dropped_queue_full: u64,
}

pub struct TokenIntake {
    window_ms: i64,
    max_concurrent_analyses: usize,
    seen: DashMap<String, i64>,
    in_flight: AtomicUsize,
    queue: TaskQueue,
    dropped_dedup: AtomicU64,
    dropped_overload: AtomicU64,
    dropped_queue_full: AtomicU64,
}

impl TokenIntake {
    pub fn new(window_ms: u64, max_concurrent_analyses: usize, queue_capacity: usize) -> Self {
        Self {
            window_ms: window_ms as i64,
            max_concurrent_analyses,
            seen: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            queue: TaskQueue::new(queue_capacity),
            dropped_dedup: AtomicU64::new(0),
            dropped_overload: AtomicU64::new(0),
            dropped_queue_full: AtomicU64::new(0),
        }
    }

    /// Submit a candidate for analysis. Returns `Err(reason)` without
    /// enqueuing anything when the address was seen within the window or the
    /// in-flight budget is exhausted.
    ///
    /// A later `SurgeUpdate` for an address already inside the window also
    /// lands here and is dropped with `Dedup` — callers should treat that as
    /// a signal to route the update as a market-data refresh rather than a
    /// failure, per the edge case in the intake contract.
    pub fn submit(&self, candidate: TokenCandidate, now_ms: i64) -> Result<(), DropReason> {
        if let Some(seen_at) = self.seen.get(&candidate.address) {
            if now_ms.saturating_sub(*seen_at) < self.window_ms {
                self.dropped_dedup.fetch_add(1, Ordering::Relaxed);
                return Err(DropReason::Dedup);
            }
        }

        if self.in_flight.load(Ordering::SeqCst) >= self.max_concurrent_analyses {
            self.dropped_overload.fetch_add(1, Ordering::Relaxed);
            return Err(DropReason::Overload);
        }

        self.seen.insert(candidate.address.clone(), now_ms);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let address = candidate.address.clone();
        let evicted = self.queue.push(EnrichmentTask {
            candidate,
            enqueued_at: now_ms,
        });
        if evicted {
            self.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
            debug!(address = %address, "intake queue at capacity — oldest task evicted");
        }

        Ok(())
    }

    /// Await the next queued task. Cooperatively yields while the queue is
    /// empty rather than busy-polling.
    pub async fn next_task(&self) -> EnrichmentTask {
        self.queue.pop().await
    }

    /// Release one slot of the in-flight budget. Does not remove the address
    /// from the dedup map — removal is purely time-based at window expiry.
    pub fn on_analysis_done(&self, _address: &str) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drop dedup entries older than the window. Call periodically; dedup
    /// correctness does not depend on this running promptly since `submit`
    /// always compares timestamps, but an unbounded map would otherwise grow
    /// forever.
    pub fn purge_expired(&self, now_ms: i64) {
        self.seen
            .retain(|_, seen_at| now_ms.saturating_sub(*seen_at) < self.window_ms);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> IntakeSnapshot {
        IntakeSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            queued: self.queue.len(),
            tracked_addresses: self.seen.len(),
            dropped_dedup: self.dropped_dedup.load(Ordering::Relaxed),
            dropped_overload: self.dropped_overload.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
        }
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
            symbol: "foo".to_string(),
            name: "Foo".to_string(),
            first_seen_at: 0,
            initial_liquidity_usd: 1_000.0,
            initial_price_usd: Some(0.01),
            source: CandidateSource::NewPairs,
        }
    }

    #[test]
    fn dedup_drops_second_submission_within_window() {
        let intake = TokenIntake::new(600_000, 8, 64);
        assert!(intake.submit(candidate("X"), 0).is_ok());
        assert_eq!(
            intake.submit(candidate("X"), 30_000),
            Err(DropReason::Dedup)
        );
    }

    #[test]
    fn dedup_boundary_accepted_one_ms_after_window() {
        let intake = TokenIntake::new(600_000, 8, 64);
        assert!(intake.submit(candidate("X"), 0).is_ok());
        intake.on_analysis_done("X");
        assert_eq!(intake.submit(candidate("X"), 599_999), Err(DropReason::Dedup));
        assert!(intake.submit(candidate("X"), 600_001).is_ok());
    }

    #[test]
    fn overload_drops_beyond_concurrency_budget() {
        let intake = TokenIntake::new(600_000, 1, 64);
        assert!(intake.submit(candidate("A"), 0).is_ok());
        assert_eq!(intake.submit(candidate("B"), 1), Err(DropReason::Overload));
    }

    #[test]
    fn overload_clears_after_analysis_done() {
        let intake = TokenIntake::new(600_000, 1, 64);
        assert!(intake.submit(candidate("A"), 0).is_ok());
        intake.on_analysis_done("A");
        assert!(intake.submit(candidate("B"), 1).is_ok());
    }

    #[test]
    fn queue_capacity_evicts_oldest_not_newest() {
        let intake = TokenIntake::new(600_000, 100, 2);
        intake.submit(candidate("A"), 0).unwrap();
        intake.submit(candidate("B"), 1).unwrap();
        intake.submit(candidate("C"), 2).unwrap();
        assert_eq!(intake.snapshot().dropped_queue_full, 1);
        assert_eq!(intake.snapshot().queued, 2);
    }

    #[tokio::test]
    async fn next_task_returns_in_fifo_order() {
        let intake = TokenIntake::new(600_000, 100, 64);
        intake.submit(candidate("A"), 0).unwrap();
        intake.submit(candidate("B"), 1).unwrap();
        let first = intake.next_task().await;
        assert_eq!(first.candidate.address, "A");
        let second = intake.next_task().await;
        assert_eq!(second.candidate.address, "B");
    }

    #[test]
    fn purge_expired_removes_old_entries_only() {
        let intake = TokenIntake::new(1_000, 100, 64);
        intake.submit(candidate("A"), 0).unwrap();
        intake.submit(candidate("B"), 500).unwrap();
        intake.purge_expired(1_500);
        assert_eq!(intake.snapshot().tracked_addresses, 1);
    }
}
