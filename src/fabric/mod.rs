// =============================================================================
// Shared Socket Fabric — multiplexed upstream WebSocket connections
// =============================================================================
//
// One background task owns the real socket per URL. Subscribers never touch
// the socket directly; they receive decoded (or raw, on decode failure)
// messages over a broadcast channel that gives each of them an independent
// bounded queue — a slow subscriber lags and drops its own oldest messages,
// it never blocks the others or the owner task.
//
// Reconnection uses exponential backoff with full jitter (the same retry
// shape the kline/aggTrade streams used ad-hoc in `market_data/`, lifted
// here into one place so every upstream URL shares it).
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, instrument, warn};

const DEFAULT_BROADCAST_CAPACITY: usize = 256;
const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
const STABLE_WINDOW: Duration = Duration::from_secs(60);
const MISSED_HEARTBEATS_BEFORE_FORCE_RECONNECT: u32 = 3;

/// Options for [`SocketFabric::get_shared_connection`]. Two calls with equal
/// `url` and equal options return the same underlying connection.
#[derive(Debug, Clone, PartialEq)]
pub struct FabricOptions {
    pub share: bool,
    pub decode_json: bool,
    pub heartbeat_interval_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub ping_payload: Option<String>,
}

impl Default for FabricOptions {
    fn default() -> Self {
        Self {
            share: true,
            decode_json: true,
            heartbeat_interval_ms: None,
            max_reconnect_attempts: None,
            initial_backoff_ms: 250,
            max_backoff_ms: 30_000,
            ping_payload: None,
        }
    }
}

/// A single inbound frame, decoded if `decode_json` was set and the frame
/// parsed as JSON.
#[derive(Debug, Clone)]
pub struct FabricMessage {
    pub url: String,
    pub raw: String,
    pub decoded: Option<serde_json::Value>,
    pub ts: i64,
}

impl FabricMessage {
    /// `true` when JSON decoding was attempted and failed — a
    /// `decoded=false` event, where the raw text is still delivered.
    pub fn decode_failed(&self, decode_requested: bool) -> bool {
        decode_requested && self.decoded.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Errored,
}

/// Dashboard-visible health of one fabric connection.
#[derive(Debug, Clone, Serialize)]
pub struct FabricConnectionSnapshot {
    pub url: String,
    pub state: ConnectionState,
    pub subscriber_count: usize,
    pub reconnect_attempts: u32,
    pub total_dropped: u64,
    pub last_error: Option<String>,
}

// =============================================================================
// Outbound buffer — bounded, drop-oldest on overflow
// =============================================================================

struct OutboundQueue {
    inner: Mutex<VecDeque<String>>,
    capacity: usize,
    notify: Notify,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn push(&self, payload: String) {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            q.pop_front();
        }
        q.push_back(payload);
        drop(q);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<String> {
        self.inner.lock().drain(..).collect()
    }
}

// =============================================================================
// FabricConnection — one shared handle per (url, options)
// =============================================================================

/// Handle to a shared upstream connection. Cloning is cheap (`Arc` inside);
/// the real socket lives in a background task owned by the fabric registry.
pub struct FabricConnection {
    url: String,
    tx: broadcast::Sender<Arc<FabricMessage>>,
    outbound: Arc<OutboundQueue>,
    subscriber_count: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
    state: Arc<Mutex<ConnectionState>>,
    reconnect_attempts: Arc<AtomicUsize>,
    total_dropped: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl FabricConnection {
    /// Buffer a payload for the owner task to send once the socket is open.
    /// If the socket is not yet open the payload sits in a bounded,
    /// drop-oldest outbound ring until it is.
    pub fn send(&self, payload: impl Into<String>) {
        self.outbound.push(payload.into());
    }

    /// Register a new consumer. The real socket closes only once every
    /// subscription returned by this method has been dropped.
    pub fn subscribe(&self) -> FabricSubscription {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        FabricSubscription {
            rx: self.tx.subscribe(),
            dropped: Arc::new(AtomicU64::new(0)),
            connection_dropped_total: self.total_dropped.clone(),
            subscriber_count: self.subscriber_count.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn snapshot(&self) -> FabricConnectionSnapshot {
        FabricConnectionSnapshot {
            url: self.url.clone(),
            state: *self.state.lock(),
            subscriber_count: self.subscriber_count.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst) as u32,
            total_dropped: self.total_dropped.load(Ordering::SeqCst),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// A live subscription to a [`FabricConnection`]. Dropping this releases the
/// reference; when the last subscription for a URL is dropped, the owner
/// task closes the real socket.
pub struct FabricSubscription {
    rx: broadcast::Receiver<Arc<FabricMessage>>,
    dropped: Arc<AtomicU64>,
    connection_dropped_total: Arc<AtomicU64>,
    subscriber_count: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

impl FabricSubscription {
    /// Await the next message, transparently skipping over any backlog that
    /// was dropped because this subscriber fell behind (bumping both the
    /// per-subscriber and connection-wide dropped counters).
    pub async fn recv(&mut self) -> Option<Arc<FabricMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                    self.connection_dropped_total.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FabricSubscription {
    fn drop(&mut self) {
        let remaining = self.subscriber_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.shutdown.notify_one();
        }
    }
}

// =============================================================================
// SocketFabric — the registry of shared connections
// =============================================================================

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct ConnectionKey {
    url: String,
    decode_json: bool,
    heartbeat_interval_ms: Option<u64>,
}

/// Registry of shared upstream connections, keyed by `url` + options.
#[derive(Clone)]
pub struct SocketFabric {
    connections: Arc<DashMap<ConnectionKey, Arc<FabricConnection>>>,
}

impl Default for SocketFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketFabric {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Return the shared connection for `url` + `options`, spawning its
    /// owner task if this is the first request for that combination.
    pub fn get_shared_connection(&self, url: &str, options: FabricOptions) -> Arc<FabricConnection> {
        let key = ConnectionKey {
            url: url.to_string(),
            decode_json: options.decode_json,
            heartbeat_interval_ms: options.heartbeat_interval_ms,
        };

        if !options.share {
            return self.spawn_connection(key, options);
        }

        if let Some(existing) = self.connections.get(&key) {
            return existing.clone();
        }

        let conn = self.spawn_connection(key.clone(), options);
        self.connections.insert(key, conn.clone());
        conn
    }

    fn spawn_connection(&self, key: ConnectionKey, options: FabricOptions) -> Arc<FabricConnection> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        let conn = Arc::new(FabricConnection {
            url: key.url.clone(),
            tx,
            outbound: Arc::new(OutboundQueue::new(DEFAULT_OUTBOUND_CAPACITY)),
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(Notify::new()),
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            reconnect_attempts: Arc::new(AtomicUsize::new(0)),
            total_dropped: Arc::new(AtomicU64::new(0)),
            last_error: Arc::new(Mutex::new(None)),
        });

        let registry = self.connections.clone();
        let conn_for_task = conn.clone();
        tokio::spawn(async move {
            run_connection(conn_for_task, options).await;
            registry.remove(&key);
        });

        conn
    }

    /// Snapshot every connection currently owned by this fabric, for the
    /// dashboard.
    pub fn snapshot_all(&self) -> Vec<FabricConnectionSnapshot> {
        self.connections.iter().map(|e| e.snapshot()).collect()
    }
}

// =============================================================================
// Owner task — connect, read, write, reconnect with jittered backoff
// =============================================================================

fn jittered_backoff(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let exp = initial_ms.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(max_ms);
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

#[instrument(skip(conn, options), fields(url = %conn.url))]
async fn run_connection(conn: Arc<FabricConnection>, options: FabricOptions) {
    let mut attempt: u32 = 0;

    loop {
        if let Some(max) = options.max_reconnect_attempts {
            if attempt > max {
                *conn.state.lock() = ConnectionState::Errored;
                *conn.last_error.lock() = Some("reconnect attempts exhausted".to_string());
                warn!(attempts = attempt, "fabric connection exhausted reconnect attempts");
                return;
            }
        }

        *conn.state.lock() = ConnectionState::Connecting;
        let connect_result = tokio_tungstenite::connect_async(&conn.url).await;

        match connect_result {
            Ok((ws_stream, _response)) => {
                info!("fabric connection open");
                *conn.state.lock() = ConnectionState::Open;
                conn.reconnect_attempts.store(0, Ordering::SeqCst);
                let opened_at = Instant::now();

                let reason = serve_connection(&conn, ws_stream, &options).await;
                debug!(reason = %reason, "fabric connection loop ended");

                if opened_at.elapsed() >= STABLE_WINDOW {
                    attempt = 0;
                } else {
                    attempt += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "fabric connect failed");
                *conn.last_error.lock() = Some(e.to_string());
                attempt += 1;
            }
        }

        // Shutdown requested (last subscriber dropped) — stop for good.
        if conn.subscriber_count.load(Ordering::SeqCst) == 0 {
            *conn.state.lock() = ConnectionState::Closed;
            info!("fabric connection closing: no subscribers remain");
            return;
        }

        *conn.state.lock() = ConnectionState::Reconnecting;
        conn.reconnect_attempts.store(attempt as usize, Ordering::SeqCst);
        let backoff = jittered_backoff(attempt, options.initial_backoff_ms, options.max_backoff_ms);
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = conn.shutdown.notified() => {
                *conn.state.lock() = ConnectionState::Closed;
                return;
            }
        }
    }
}

/// Drains the outbound buffer, forwards inbound frames to subscribers, and
/// watches heartbeats. Returns a short reason string for logging once the
/// socket drops or shutdown is requested.
async fn serve_connection(
    conn: &Arc<FabricConnection>,
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    options: &FabricOptions,
) -> &'static str {
    let (mut write, mut read) = ws_stream.split();

    // Flush anything buffered while the socket was down.
    for payload in conn.outbound.drain() {
        if write.send(WsMessage::Text(payload.into())).await.is_err() {
            return "write error flushing backlog";
        }
    }

    let mut last_inbound = Instant::now();
    let mut missed_heartbeats: u32 = 0;
    let mut heartbeat_ticker = match options.heartbeat_interval_ms {
        Some(ms) => Some(tokio::time::interval(Duration::from_millis(ms))),
        None => None,
    };

    loop {
        tokio::select! {
            biased;

            _ = conn.shutdown.notified() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return "shutdown requested";
            }

            _ = conn.outbound.notify.notified() => {
                for payload in conn.outbound.drain() {
                    if write.send(WsMessage::Text(payload.into())).await.is_err() {
                        return "write error";
                    }
                }
            }

            _ = async {
                match heartbeat_ticker.as_mut() {
                    Some(t) => { t.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            }, if heartbeat_ticker.is_some() => {
                if last_inbound.elapsed() > Duration::from_millis(
                    options.heartbeat_interval_ms.unwrap_or(u64::MAX)
                ) {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MISSED_HEARTBEATS_BEFORE_FORCE_RECONNECT {
                        return "heartbeat timeout";
                    }
                } else {
                    missed_heartbeats = 0;
                }
                if let Some(payload) = options.ping_payload.clone() {
                    if write.send(WsMessage::Text(payload.into())).await.is_err() {
                        return "write error sending heartbeat";
                    }
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_inbound = Instant::now();
                        let decoded = if options.decode_json {
                            serde_json::from_str::<serde_json::Value>(&text).ok()
                        } else {
                            None
                        };
                        let msg = Arc::new(FabricMessage {
                            url: conn.url.clone(),
                            raw: text.to_string(),
                            decoded,
                            ts: chrono::Utc::now().timestamp_millis(),
                        });
                        // Errors here only mean there are currently zero
                        // subscribers; the message is simply not delivered.
                        let _ = conn.tx.send(msg);
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        last_inbound = Instant::now();
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        return "peer closed";
                    }
                    Some(Ok(WsMessage::Binary(_) | WsMessage::Frame(_))) => {
                        last_inbound = Instant::now();
                    }
                    Some(Err(e)) => {
                        *conn.last_error.lock() = Some(e.to_string());
                        return "read error";
                    }
                    None => {
                        return "stream ended";
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_queue_drops_oldest_on_overflow() {
        let q = OutboundQueue::new(2);
        q.push("a".to_string());
        q.push("b".to_string());
        q.push("c".to_string());
        assert_eq!(q.drain(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn jittered_backoff_is_capped() {
        for attempt in 0..30 {
            let d = jittered_backoff(attempt, 250, 30_000);
            assert!(d.as_millis() <= 30_000);
        }
    }

    #[test]
    fn jittered_backoff_grows_with_attempt_ceiling() {
        // at attempt 0 the ceiling is initial_backoff_ms; by a few attempts
        // in it should be saturated at max_backoff_ms.
        let low_ceiling = 250u64.saturating_mul(1 << 0u32);
        let high_ceiling = 250u64.saturating_mul(1 << 10u32).min(30_000);
        assert!(low_ceiling < high_ceiling);
    }

    #[tokio::test]
    async fn fabric_options_share_defaults_true() {
        let opts = FabricOptions::default();
        assert!(opts.share);
        assert!(opts.decode_json);
        assert_eq!(opts.initial_backoff_ms, 250);
    }

    #[tokio::test]
    async fn get_shared_connection_returns_same_handle_for_identical_key() {
        let fabric = SocketFabric::new();
        // Use a URL that will fail to connect quickly; we only care that
        // the registry returns the identical Arc for repeated calls before
        // the owner task's first connect attempt completes.
        let a = fabric.get_shared_connection("ws://127.0.0.1:1/nonexistent", FabricOptions::default());
        let b = fabric.get_shared_connection("ws://127.0.0.1:1/nonexistent", FabricOptions::default());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn decode_failed_reports_true_only_when_decode_requested_and_absent() {
        let msg = FabricMessage {
            url: "ws://x".to_string(),
            raw: "not json".to_string(),
            decoded: None,
            ts: 0,
        };
        assert!(msg.decode_failed(true));
        assert!(!msg.decode_failed(false));
    }
}
