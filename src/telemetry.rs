// =============================================================================
// Telemetry Sink Client — one-way, non-blocking event publisher
// =============================================================================
//
// Events (signal, trade, portfolio, performance, status) are enqueued into a
// bounded queue and shipped by a background worker via HTTP POST. When the
// queue is full the OLDEST event is dropped; publishing never blocks the
// scan loop, and a sink outage costs telemetry only — trade records and
// state snapshots take the durable path through the state manager instead.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Kinds of events the sink accepts, with their endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Signal,
    Trade,
    Portfolio,
    Performance,
    Status,
}

impl EventType {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Signal => "/api/signals",
            Self::Trade => "/api/trades",
            Self::Portfolio => "/api/portfolio",
            Self::Performance => "/api/performance",
            Self::Status => "/api/status",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Trade => "trade",
            Self::Portfolio => "portfolio",
            Self::Performance => "performance",
            Self::Status => "status",
        }
    }
}

/// A queued event: timestamp + type + canonical JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub timestamp: DateTime<Utc>,
    pub event_type: &'static str,
    pub payload: serde_json::Value,
    #[serde(skip)]
    endpoint: &'static str,
}

// ---------------------------------------------------------------------------
// Bounded drop-oldest queue
// ---------------------------------------------------------------------------

/// FIFO queue with a hard capacity; pushing past capacity evicts the oldest
/// entry. Push order is preserved for whatever survives.
pub struct TelemetryQueue {
    inner: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    notify: Notify,
}

impl TelemetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Enqueue; drops the oldest entry when full. Never blocks.
    pub fn push(&self, envelope: Envelope) {
        {
            let mut queue = self.inner.lock();
            queue.push_back(envelope);
            while queue.len() > self.capacity {
                queue.pop_front();
                debug!("telemetry queue full — oldest event dropped");
            }
        }
        self.notify.notify_one();
    }

    /// Take everything currently queued, in push order.
    pub fn drain(&self) -> Vec<Envelope> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Per-event delivery retry backoff.
const POST_BACKOFF_SECS: [f64; 3] = [0.5, 1.0, 2.0];

/// Handle used by the engine to publish events. Cloneable; all clones feed
/// the same queue. A client built with an empty URL is a no-op.
#[derive(Clone)]
pub struct TelemetryClient {
    queue: Option<Arc<TelemetryQueue>>,
}

impl TelemetryClient {
    /// Build the client and spawn its background worker. An empty `base_url`
    /// disables publishing entirely.
    pub fn new(base_url: &str, queue_capacity: usize) -> Self {
        if base_url.is_empty() {
            return Self { queue: None };
        }

        let queue = Arc::new(TelemetryQueue::new(queue_capacity));
        let worker_queue = queue.clone();
        let base_url = base_url.to_string();

        tokio::spawn(async move {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client");

            loop {
                worker_queue.wait().await;
                for envelope in worker_queue.drain() {
                    deliver(&client, &base_url, &envelope).await;
                }
            }
        });

        Self { queue: Some(queue) }
    }

    /// A client that never publishes (backtests, tests).
    pub fn disabled() -> Self {
        Self { queue: None }
    }

    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        let Some(queue) = &self.queue else {
            return;
        };
        queue.push(Envelope {
            timestamp: Utc::now(),
            event_type: event_type.as_str(),
            payload,
            endpoint: event_type.endpoint(),
        });
    }

    pub fn publish_signal(&self, signal: &impl Serialize) {
        self.publish_serialisable(EventType::Signal, signal);
    }

    pub fn publish_trade(&self, trade: &impl Serialize) {
        self.publish_serialisable(EventType::Trade, trade);
    }

    pub fn publish_portfolio(&self, snapshot: &impl Serialize) {
        self.publish_serialisable(EventType::Portfolio, snapshot);
    }

    pub fn publish_performance(&self, counters: &impl Serialize) {
        self.publish_serialisable(EventType::Performance, counters);
    }

    pub fn publish_status(&self, iteration: u64, state: &str) {
        self.publish(
            EventType::Status,
            serde_json::json!({
                "iteration": iteration,
                "state": state,
                "timestamp": Utc::now(),
            }),
        );
    }

    fn publish_serialisable(&self, event_type: EventType, value: &impl Serialize) {
        match serde_json::to_value(value) {
            Ok(payload) => self.publish(event_type, payload),
            Err(e) => warn!(error = %e, kind = event_type.as_str(), "unserialisable telemetry event dropped"),
        }
    }
}

/// POST one envelope with bounded retries; failures drop the event.
async fn deliver(client: &reqwest::Client, base_url: &str, envelope: &Envelope) {
    let url = format!("{}{}", base_url, envelope.endpoint);

    for (attempt, backoff) in POST_BACKOFF_SECS.iter().enumerate() {
        match client.post(&url).json(envelope).send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                debug!(url = %url, status = %resp.status(), attempt, "telemetry post rejected");
            }
            Err(e) => {
                debug!(url = %url, error = %e, attempt, "telemetry post failed");
            }
        }
        if attempt + 1 < POST_BACKOFF_SECS.len() {
            tokio::time::sleep(Duration::from_secs_f64(*backoff)).await;
        }
    }
    warn!(url = %url, event = envelope.event_type, "telemetry event dropped after retries");
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(n: u64) -> Envelope {
        Envelope {
            timestamp: Utc::now(),
            event_type: "status",
            payload: serde_json::json!({ "n": n }),
            endpoint: "/api/status",
        }
    }

    #[test]
    fn endpoints_match_sink_api() {
        assert_eq!(EventType::Signal.endpoint(), "/api/signals");
        assert_eq!(EventType::Trade.endpoint(), "/api/trades");
        assert_eq!(EventType::Portfolio.endpoint(), "/api/portfolio");
        assert_eq!(EventType::Performance.endpoint(), "/api/performance");
        assert_eq!(EventType::Status.endpoint(), "/api/status");
    }

    #[test]
    fn queue_preserves_push_order() {
        let queue = TelemetryQueue::new(10);
        for n in 0..5 {
            queue.push(envelope(n));
        }
        let drained = queue.drain();
        let ns: Vec<u64> = drained.iter().map(|e| e.payload["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, [0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = TelemetryQueue::new(3);
        for n in 0..5 {
            queue.push(envelope(n));
        }
        let ns: Vec<u64> = queue
            .drain()
            .iter()
            .map(|e| e.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, [2, 3, 4]);
    }

    #[test]
    fn concurrent_publishes_do_not_corrupt_ordering() {
        let queue = Arc::new(TelemetryQueue::new(10_000));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let q = queue.clone();
            handles.push(std::thread::spawn(move || {
                for n in 0..100u64 {
                    q.push(envelope(t * 1_000 + n));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 400);
        // Per-thread order must be preserved even under interleaving.
        for t in 0..4u64 {
            let thread_ns: Vec<u64> = drained
                .iter()
                .map(|e| e.payload["n"].as_u64().unwrap())
                .filter(|n| n / 1_000 == t)
                .collect();
            let mut sorted = thread_ns.clone();
            sorted.sort_unstable();
            assert_eq!(thread_ns, sorted, "thread {t} order corrupted");
        }
    }

    #[tokio::test]
    async fn disabled_client_is_a_noop() {
        let client = TelemetryClient::disabled();
        client.publish_status(1, "scanning");
        client.publish(EventType::Trade, serde_json::json!({"x": 1}));
        // Nothing to assert beyond "does not panic / does not block".
    }

    #[test]
    fn envelope_serialises_without_endpoint() {
        let json = serde_json::to_value(envelope(7)).unwrap();
        assert!(json.get("endpoint").is_none());
        assert_eq!(json["event_type"], "status");
        assert_eq!(json["payload"]["n"], 7);
    }
}
