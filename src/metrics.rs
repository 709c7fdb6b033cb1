//! Prometheus metrics for Jewelbox
//!
//! Tracks the health of the pricing and event runtime:
//! - HTTP request outcomes and retries
//! - Circuit breaker state per protected operation
//! - Price cache lookups (fresh / stale / miss / default)
//! - Event bus throughput and queue depth

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::circuit_breaker::CircuitState;

/// Metrics state
pub struct MetricsState {
    /// Prometheus registry
    registry: Registry,
    /// HTTP requests by method and outcome
    pub http_requests: IntCounterVec,
    /// HTTP retry attempts
    pub http_retries: IntCounter,
    /// Circuit breaker state by name (0 = closed, 1 = half-open, 2 = open)
    pub circuit_breaker_state: IntGaugeVec,
    /// Price cache lookups by client and result
    pub price_cache_lookups: IntCounterVec,
    /// Events accepted by `publish`/`publish_sync`
    pub events_published: IntCounter,
    /// Successful event deliveries
    pub events_delivered: IntCounter,
    /// Failed delivery attempts
    pub events_failed: IntCounter,
    /// Events dropped after exhausting retries
    pub events_dropped: IntCounter,
    /// Event queue depth gauge
    pub event_queue_depth: IntGauge,
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("jewelbox_http_requests_total", "HTTP requests by method and outcome"),
            &["method", "outcome"],
        )
        .expect("Failed to create http_requests counter");
        registry
            .register(Box::new(http_requests.clone()))
            .expect("Failed to register http_requests");

        let http_retries = IntCounter::with_opts(Opts::new(
            "jewelbox_http_retries_total",
            "HTTP retry attempts after retryable failures",
        ))
        .expect("Failed to create http_retries counter");
        registry
            .register(Box::new(http_retries.clone()))
            .expect("Failed to register http_retries");

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "jewelbox_circuit_breaker_state",
                "Circuit breaker state (0 = closed, 1 = half-open, 2 = open)",
            ),
            &["name"],
        )
        .expect("Failed to create circuit_breaker_state gauge");
        registry
            .register(Box::new(circuit_breaker_state.clone()))
            .expect("Failed to register circuit_breaker_state");

        let price_cache_lookups = IntCounterVec::new(
            Opts::new(
                "jewelbox_price_cache_lookups_total",
                "Price lookups by client and result",
            ),
            &["client", "result"],
        )
        .expect("Failed to create price_cache_lookups counter");
        registry
            .register(Box::new(price_cache_lookups.clone()))
            .expect("Failed to register price_cache_lookups");

        let events_published = IntCounter::with_opts(Opts::new(
            "jewelbox_events_published_total",
            "Domain events published",
        ))
        .expect("Failed to create events_published counter");
        registry
            .register(Box::new(events_published.clone()))
            .expect("Failed to register events_published");

        let events_delivered = IntCounter::with_opts(Opts::new(
            "jewelbox_events_delivered_total",
            "Domain events delivered to all subscribers",
        ))
        .expect("Failed to create events_delivered counter");
        registry
            .register(Box::new(events_delivered.clone()))
            .expect("Failed to register events_delivered");

        let events_failed = IntCounter::with_opts(Opts::new(
            "jewelbox_events_failed_total",
            "Failed event delivery attempts",
        ))
        .expect("Failed to create events_failed counter");
        registry
            .register(Box::new(events_failed.clone()))
            .expect("Failed to register events_failed");

        let events_dropped = IntCounter::with_opts(Opts::new(
            "jewelbox_events_dropped_total",
            "Domain events dropped after exhausting retries",
        ))
        .expect("Failed to create events_dropped counter");
        registry
            .register(Box::new(events_dropped.clone()))
            .expect("Failed to register events_dropped");

        let event_queue_depth = IntGauge::with_opts(Opts::new(
            "jewelbox_event_queue_depth",
            "Events waiting for asynchronous delivery",
        ))
        .expect("Failed to create event_queue_depth gauge");
        registry
            .register(Box::new(event_queue_depth.clone()))
            .expect("Failed to register event_queue_depth");

        Self {
            registry,
            http_requests,
            http_retries,
            circuit_breaker_state,
            price_cache_lookups,
            events_published,
            events_delivered,
            events_failed,
            events_dropped,
            event_queue_depth,
        }
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a breaker state change
    pub fn set_breaker_state(&self, name: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        self.circuit_breaker_state.with_label_values(&[name]).set(value);
    }

    /// Record a price cache lookup result
    pub fn record_price_lookup(&self, client: &str, result: &str) {
        self.price_cache_lookups
            .with_label_values(&[client, result])
            .inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}
