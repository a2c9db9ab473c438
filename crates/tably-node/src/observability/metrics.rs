//! Prometheus metrics collection.
//!
//! Covers HTTP traffic plus the transfer side of the node: negotiation
//! rounds, packfile chunks, objects moved in each direction, ref update
//! outcomes and live sessions.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    /// Route label, see [`route_label`].
    pub path: String,
    pub status: u16,
}

/// Labels for per-session counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SessionLabels {
    /// `upload-pack` or `receive-pack`.
    pub kind: String,
}

/// Labels for ref update outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RefUpdateLabels {
    /// `ok` or the rejection reason.
    pub outcome: String,
}

/// Global metrics state.
pub static METRICS: Lazy<MetricsState> = Lazy::new(MetricsState::new);

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    pub registry: Arc<RwLock<Registry>>,
    pub http_requests_total: Family<HttpLabels, Counter>,
    /// HTTP request duration histogram (seconds).
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    pub http_active_connections: Gauge,
    /// Rounds needed before an upload-pack session sent its first chunk.
    pub negotiation_rounds: Histogram,
    pub packfile_chunks_sent: Counter,
    pub objects_sent: Counter,
    pub objects_received: Counter,
    pub ref_updates_total: Family<RefUpdateLabels, Counter>,
    pub active_sessions: Family<SessionLabels, Gauge>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "tably_http_requests",
            "Total HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            });
        registry.register(
            "tably_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_active_connections = Gauge::default();
        registry.register(
            "tably_http_active_connections",
            "Number of in-flight HTTP requests",
            http_active_connections.clone(),
        );

        let negotiation_rounds = Histogram::new(exponential_buckets(1.0, 2.0, 8));
        registry.register(
            "tably_negotiation_rounds",
            "Want/have rounds per upload-pack session",
            negotiation_rounds.clone(),
        );

        let packfile_chunks_sent = Counter::default();
        registry.register(
            "tably_packfile_chunks_sent",
            "Packfile chunks sent by upload-pack",
            packfile_chunks_sent.clone(),
        );

        let objects_sent = Counter::default();
        registry.register(
            "tably_objects_sent",
            "Objects sent by upload-pack",
            objects_sent.clone(),
        );

        let objects_received = Counter::default();
        registry.register(
            "tably_objects_received",
            "Objects stored by receive-pack",
            objects_received.clone(),
        );

        let ref_updates_total = Family::<RefUpdateLabels, Counter>::default();
        registry.register(
            "tably_ref_updates",
            "Pushed ref updates by outcome",
            ref_updates_total.clone(),
        );

        let active_sessions = Family::<SessionLabels, Gauge>::default();
        registry.register(
            "tably_active_sessions",
            "Live transfer sessions",
            active_sessions.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            http_requests_total,
            http_request_duration_seconds,
            http_active_connections,
            negotiation_rounds,
            packfile_chunks_sent,
            objects_sent,
            objects_received,
            ref_updates_total,
            active_sessions,
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: route_label(path).to_string(),
            status,
        };

        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record the outcome of one pushed ref update.
    pub fn record_ref_update(&self, err_msg: Option<&str>) {
        let labels = RefUpdateLabels {
            outcome: err_msg.unwrap_or("ok").to_string(),
        };
        self.ref_updates_total.get_or_create(&labels).inc();
    }

    /// Set the live session gauge for one session kind.
    pub fn set_active_sessions(&self, kind: &str, count: usize) {
        let labels = SessionLabels {
            kind: kind.to_string(),
        };
        self.active_sessions
            .get_or_create(&labels)
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

/// Maps a request path onto one of the known routes, so arbitrary
/// paths do not create unbounded label sets.
pub fn route_label(path: &str) -> &'static str {
    match path.trim_end_matches('/') {
        "/info/refs" => "/info/refs",
        "/upload-pack" => "/upload-pack",
        "/receive-pack" => "/receive-pack",
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "other",
    }
}
