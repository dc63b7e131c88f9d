use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Message ingestion (outcomes, latency, in-flight handlers)
// - Cache warm-up and reconciliation
// - Cache circuit breaker state
// - Read path hit/miss
//
// Everything lives in one registry, scraped via /metrics.
// ============================================================================

pub mod outcome {
    pub const STORED: &str = "stored";
    pub const MALFORMED: &str = "malformed";
    pub const INVALID: &str = "invalid";
    pub const STORE_FAILED: &str = "store_failed";
    pub const ACK_FAILED: &str = "ack_failed";
}

pub mod source {
    pub const CACHE: &str = "cache";
    pub const STORE: &str = "store";
    pub const NOT_FOUND: &str = "not_found";
    pub const ERROR: &str = "error";
}

pub struct Metrics {
    registry: Registry,

    // Ingestion
    pub ingest_messages: IntCounterVec,
    pub ingest_cache_write_failures: IntCounter,
    pub ingest_processing_duration: Histogram,
    pub ingest_in_flight: IntGauge,

    // Warm-up / reconciliation
    pub cache_restore_orders: IntCounter,
    pub cache_load_failures: IntCounter,
    pub cache_keys_deleted: IntCounter,
    pub sync_runs: IntCounterVec,
    pub sync_duration: Histogram,

    // Circuit breaker
    pub cache_circuit_breaker_state: IntGauge,

    // Read path
    pub read_requests: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Ingestion
        let ingest_messages = IntCounterVec::new(
            Opts::new("ingest_messages_total", "Broker messages handled, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_messages.clone()))?;

        let ingest_cache_write_failures = IntCounter::new(
            "ingest_cache_write_failures_total",
            "Cache writes that failed after the order was stored",
        )?;
        registry.register(Box::new(ingest_cache_write_failures.clone()))?;

        let ingest_processing_duration = Histogram::with_opts(
            HistogramOpts::new("ingest_processing_duration_seconds", "Per-message handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(ingest_processing_duration.clone()))?;

        let ingest_in_flight = IntGauge::new("ingest_in_flight", "Message handlers currently running")?;
        registry.register(Box::new(ingest_in_flight.clone()))?;

        // Warm-up / reconciliation
        let cache_restore_orders = IntCounter::new(
            "cache_restore_orders_total",
            "Orders written to the cache by warm-up and reconciliation",
        )?;
        registry.register(Box::new(cache_restore_orders.clone()))?;

        let cache_load_failures = IntCounter::new(
            "cache_load_failures_total",
            "Orders a bulk load failed to cache",
        )?;
        registry.register(Box::new(cache_load_failures.clone()))?;

        let cache_keys_deleted = IntCounter::new(
            "cache_keys_deleted_total",
            "Cache keys removed by reconciliation",
        )?;
        registry.register(Box::new(cache_keys_deleted.clone()))?;

        let sync_runs = IntCounterVec::new(
            Opts::new("sync_runs_total", "Reconciliation runs, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(sync_runs.clone()))?;

        let sync_duration = Histogram::with_opts(
            HistogramOpts::new("sync_duration_seconds", "Reconciliation run duration")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(sync_duration.clone()))?;

        // Circuit breaker
        let cache_circuit_breaker_state = IntGauge::new(
            "cache_circuit_breaker_state",
            "Cache circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(cache_circuit_breaker_state.clone()))?;

        // Read path
        let read_requests = IntCounterVec::new(
            Opts::new("read_requests_total", "Order reads, by where the answer came from"),
            &["source"],
        )?;
        registry.register(Box::new(read_requests.clone()))?;

        Ok(Self {
            registry,
            ingest_messages,
            ingest_cache_write_failures,
            ingest_processing_duration,
            ingest_in_flight,
            cache_restore_orders,
            cache_load_failures,
            cache_keys_deleted,
            sync_runs,
            sync_duration,
            cache_circuit_breaker_state,
            read_requests,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record one handled message
    pub fn record_ingest(&self, outcome: &str, duration_secs: f64) {
        self.ingest_messages.with_label_values(&[outcome]).inc();
        self.ingest_processing_duration.observe(duration_secs);
    }

    pub fn record_cache_write_failure(&self) {
        self.ingest_cache_write_failures.inc();
    }

    pub fn record_orders_cached(&self, count: usize) {
        self.cache_restore_orders.inc_by(count as u64);
    }

    pub fn record_load_failure(&self) {
        self.cache_load_failures.inc();
    }

    pub fn record_keys_deleted(&self, count: usize) {
        self.cache_keys_deleted.inc_by(count as u64);
    }

    /// Helper to record a reconciliation run
    pub fn record_sync_run(&self, outcome: &str, duration_secs: f64) {
        self.sync_runs.with_label_values(&[outcome]).inc();
        self.sync_duration.observe(duration_secs);
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.cache_circuit_breaker_state.set(state.as_gauge());
    }

    pub fn record_read(&self, source: &str) {
        self.read_requests.with_label_values(&[source]).inc();
    }
}
