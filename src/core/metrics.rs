//! Component G: Metrics Core.
//!
//! Single owner of the connection map, the completed-connection history
//! ring, and the per-endpoint aggregate map, all behind one lock. Writers
//! take the lock directly; readers call `snapshot()` and get a deep copy so
//! they never block a writer mid-mutation.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const MAX_TOKEN_HISTORY: usize = 300;
const MAX_CONNECTION_HISTORY: usize = 1000;
const MAX_RESPONSE_TIME_SAMPLES: usize = 1000;

/// Monotone token counters, aggregated at connection/endpoint/process scope.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Completed,
    Failed,
}

/// Per-request lifecycle record. Created on arrival, moved into the history
/// ring (and removed from the active map) on completion or failure.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: String,
    pub client_ip: String,
    pub user_agent: String,
    pub method: String,
    pub path: String,
    #[serde(skip)]
    pub start: Instant,
    #[serde(skip)]
    pub last_activity: Instant,
    pub endpoint: String,
    pub retry_count: u32,
    pub status: ConnectionStatus,
    pub bytes_sent: u64,
    pub is_streaming: bool,
    pub tokens: TokenUsage,
}

/// A single point on the cumulative token-usage timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TokenHistoryPoint {
    pub at_millis_since_start: u64,
    pub cumulative: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointAggregate {
    pub name: String,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    #[serde(skip)]
    pub sum_response_time: Duration,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
    #[serde(skip)]
    pub last_used: Option<Instant>,
    pub tokens: TokenUsage,
}

impl EndpointAggregate {
    fn new(name: String) -> Self {
        Self {
            name,
            total: 0,
            successful: 0,
            failed: 0,
            retries: 0,
            sum_response_time: Duration::ZERO,
            min_response_time_ms: None,
            max_response_time_ms: None,
            last_used: None,
            tokens: TokenUsage::default(),
        }
    }

    pub fn average_response_time_ms(&self) -> f64 {
        if self.successful + self.failed == 0 {
            0.0
        } else {
            self.sum_response_time.as_millis() as f64 / (self.successful + self.failed) as f64
        }
    }
}

/// A deep-copied view of the metrics core for readers. Owns its own data;
/// mutating it has no effect on the live state.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub active_connections: Vec<Connection>,
    pub history: Vec<Connection>,
    pub endpoint_aggregates: HashMap<String, EndpointAggregate>,
    pub global_tokens: TokenUsage,
    pub token_history: Vec<TokenHistoryPoint>,
}

struct MetricsStorage {
    active: HashMap<u64, Connection>,
    history: std::collections::VecDeque<Connection>,
    endpoints: HashMap<String, EndpointAggregate>,
    global_tokens: TokenUsage,
    token_history: std::collections::VecDeque<TokenHistoryPoint>,
    response_time_samples: std::collections::VecDeque<Duration>,
}

impl Default for MetricsStorage {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
            history: std::collections::VecDeque::new(),
            endpoints: HashMap::new(),
            global_tokens: TokenUsage::default(),
            token_history: std::collections::VecDeque::new(),
            response_time_samples: std::collections::VecDeque::new(),
        }
    }
}

/// Monotonic counter + process-start nanoseconds, formatted as fixed-width
/// hex. Avoids a wall-clock formatted id, which can collide under
/// sub-microsecond arrival rates.
pub struct ConnectionIdGenerator {
    process_start_nanos: u64,
    counter: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self {
            process_start_nanos: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> (u64, String) {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:016x}{:08x}", self.process_start_nanos, seq);
        (seq, id)
    }
}

pub struct MetricsCore {
    storage: RwLock<MetricsStorage>,
    id_gen: ConnectionIdGenerator,
    start_time: Instant,
}

impl MetricsCore {
    pub fn new() -> Self {
        Self {
            storage: RwLock::new(MetricsStorage::default()),
            id_gen: ConnectionIdGenerator::new(),
            start_time: Instant::now(),
        }
    }

    pub fn begin_connection(&self, client_ip: String, user_agent: String, method: String, path: String) -> u64 {
        let (seq, id_str) = self.id_gen.next();
        let now = Instant::now();
        let conn = Connection {
            id: id_str,
            client_ip,
            user_agent,
            method,
            path,
            start: now,
            last_activity: now,
            endpoint: "unknown".to_string(),
            retry_count: 0,
            status: ConnectionStatus::Active,
            bytes_sent: 0,
            is_streaming: false,
            tokens: TokenUsage::default(),
        };
        self.storage.write().active.insert(seq, conn);
        seq
    }

    pub fn attach_endpoint(&self, id: u64, endpoint_name: &str) {
        let mut storage = self.storage.write();
        if let Some(conn) = storage.active.get_mut(&id) {
            conn.endpoint = endpoint_name.to_string();
            conn.last_activity = Instant::now();
        }
    }

    pub fn mark_streaming(&self, id: u64) {
        let mut storage = self.storage.write();
        if let Some(conn) = storage.active.get_mut(&id) {
            conn.is_streaming = true;
        }
    }

    /// Records that `endpoint_name` was abandoned after a failed attempt:
    /// bumps the connection's retry count and the endpoint aggregate's
    /// `retries` and `failed` counters. `end_connection` is called once per
    /// request and only attributes the final outcome to the last endpoint
    /// tried, so every earlier candidate's failure has to be recorded here.
    pub fn record_retry(&self, id: u64, endpoint_name: &str) {
        let mut storage = self.storage.write();
        if let Some(conn) = storage.active.get_mut(&id) {
            conn.retry_count += 1;
            conn.last_activity = Instant::now();
        }
        let agg = storage
            .endpoints
            .entry(endpoint_name.to_string())
            .or_insert_with(|| EndpointAggregate::new(endpoint_name.to_string()));
        agg.retries += 1;
        agg.failed += 1;
    }

    pub fn record_tokens(&self, id: u64, endpoint_name: &str, delta: TokenUsage) {
        let mut storage = self.storage.write();
        if let Some(conn) = storage.active.get_mut(&id) {
            conn.tokens.add(&delta);
        }
        storage
            .endpoints
            .entry(endpoint_name.to_string())
            .or_insert_with(|| EndpointAggregate::new(endpoint_name.to_string()))
            .tokens
            .add(&delta);
        storage.global_tokens.add(&delta);
        let cumulative = storage.global_tokens;
        let elapsed = self.start_time.elapsed().as_millis() as u64;
        let history = &mut storage.token_history;
        history.push_back(TokenHistoryPoint {
            at_millis_since_start: elapsed,
            cumulative,
        });
        if history.len() > MAX_TOKEN_HISTORY {
            history.pop_front();
        }
    }

    /// Records a dispatch attempt against `endpoint_name`'s `total` counter.
    /// Called once per candidate attempt, before the outcome is known, so
    /// `total` can exceed `successful + failed` while a request is in flight
    /// (§3 invariant).
    pub fn record_attempt(&self, endpoint_name: &str) {
        self.storage
            .write()
            .endpoints
            .entry(endpoint_name.to_string())
            .or_insert_with(|| EndpointAggregate::new(endpoint_name.to_string()))
            .total += 1;
    }

    /// Moves a connection from the active map into the history ring and
    /// updates the endpoint aggregate.
    pub fn end_connection(
        &self,
        id: u64,
        status: ConnectionStatus,
        bytes_sent: u64,
        duration: Duration,
        endpoint_name: &str,
        success: bool,
    ) {
        let mut storage = self.storage.write();
        let mut conn = match storage.active.remove(&id) {
            Some(c) => c,
            None => return,
        };
        conn.status = status;
        conn.bytes_sent = bytes_sent;
        conn.last_activity = Instant::now();

        let agg = storage
            .endpoints
            .entry(endpoint_name.to_string())
            .or_insert_with(|| EndpointAggregate::new(endpoint_name.to_string()));
        if success {
            agg.successful += 1;
        } else {
            agg.failed += 1;
        }
        agg.sum_response_time += duration;
        let ms = duration.as_millis() as u64;
        agg.min_response_time_ms = Some(agg.min_response_time_ms.map_or(ms, |m| m.min(ms)));
        agg.max_response_time_ms = Some(agg.max_response_time_ms.map_or(ms, |m| m.max(ms)));
        agg.last_used = Some(Instant::now());

        storage.response_time_samples.push_back(duration);
        if storage.response_time_samples.len() > MAX_RESPONSE_TIME_SAMPLES {
            storage.response_time_samples.pop_front();
        }

        storage.history.push_back(conn);
        if storage.history.len() > MAX_CONNECTION_HISTORY {
            storage.history.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let storage = self.storage.read();
        MetricsSnapshot {
            active_connections: storage.active.values().cloned().collect(),
            history: storage.history.iter().cloned().collect(),
            endpoint_aggregates: storage.endpoints.clone(),
            global_tokens: storage.global_tokens,
            token_history: storage.token_history.iter().cloned().collect(),
        }
    }

    pub fn get_token_history(&self) -> Vec<TokenHistoryPoint> {
        self.storage.read().token_history.iter().cloned().collect()
    }

    pub fn get_success_rate(&self, endpoint_name: &str) -> Option<f64> {
        let storage = self.storage.read();
        let agg = storage.endpoints.get(endpoint_name)?;
        let total = agg.successful + agg.failed;
        if total == 0 {
            None
        } else {
            Some(agg.successful as f64 / total as f64)
        }
    }

    pub fn get_average_response_time(&self, endpoint_name: &str) -> Option<Duration> {
        let storage = self.storage.read();
        let agg = storage.endpoints.get(endpoint_name)?;
        let total = agg.successful + agg.failed;
        if total == 0 {
            None
        } else {
            Some(agg.sum_response_time / total as u32)
        }
    }
}

impl Default for MetricsCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_are_monotone_across_events() {
        let metrics = MetricsCore::new();
        let id = metrics.begin_connection("1.2.3.4".into(), "curl".into(), "GET".into(), "/x".into());
        metrics.attach_endpoint(id, "a");
        metrics.record_attempt("a");
        let before = metrics.snapshot();
        metrics.end_connection(id, ConnectionStatus::Completed, 10, Duration::from_millis(5), "a", true);
        let after = metrics.snapshot();
        let before_agg = before.endpoint_aggregates.get("a");
        let after_agg = after.endpoint_aggregates.get("a").unwrap();
        assert!(before_agg.map_or(0, |a| a.successful) <= after_agg.successful);
        assert_eq!(after_agg.successful, 1);
        assert_eq!(after_agg.total, 1);
    }

    #[test]
    fn token_history_caps_at_300_points() {
        let metrics = MetricsCore::new();
        let id = metrics.begin_connection("ip".into(), "ua".into(), "GET".into(), "/".into());
        for _ in 0..310 {
            metrics.record_tokens(
                id,
                "a",
                TokenUsage {
                    input_tokens: 1,
                    ..Default::default()
                },
            );
        }
        assert_eq!(metrics.get_token_history().len(), MAX_TOKEN_HISTORY);
    }

    #[test]
    fn connection_moves_from_active_to_history_never_both() {
        let metrics = MetricsCore::new();
        let id = metrics.begin_connection("ip".into(), "ua".into(), "GET".into(), "/".into());
        let mid = metrics.snapshot();
        assert_eq!(mid.active_connections.len(), 1);
        assert_eq!(mid.history.len(), 0);
        metrics.end_connection(id, ConnectionStatus::Completed, 0, Duration::ZERO, "a", true);
        let after = metrics.snapshot();
        assert_eq!(after.active_connections.len(), 0);
        assert_eq!(after.history.len(), 1);
    }

    #[test]
    fn ids_are_unique_and_monotonic_even_for_same_nanosecond() {
        let gen = ConnectionIdGenerator::new();
        let (seq_a, id_a) = gen.next();
        let (seq_b, id_b) = gen.next();
        assert_ne!(id_a, id_b);
        assert!(seq_b > seq_a);
    }
}
