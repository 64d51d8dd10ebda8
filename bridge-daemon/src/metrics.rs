//! Prometheus metrics for the bridge.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `github_bridge_push_attempts_total` | Counter | |
//! | `github_bridge_push_successes_total` | Counter | |
//! | `github_bridge_push_failures_total` | Counter | |
//! | `github_bridge_documents_processed_total` | Counter | |
//! | `github_bridge_documents_skipped_total` | Counter | |
//! | `github_bridge_batch_size` | Histogram | |
//! | `github_bridge_batch_duration_seconds` | Histogram | |
//! | `github_bridge_git_clone_duration_seconds` | Histogram | |
//! | `github_bridge_git_push_duration_seconds` | Histogram | |
//! | `github_bridge_mongo_query_duration_seconds` | Histogram | |
//! | `github_bridge_mongo_update_duration_seconds` | Histogram | |
//! | `github_bridge_errors_total` | Counter | `type` |
//! | `github_bridge_active_workers` | Gauge | |
//! | `github_bridge_queue_size` | Gauge | |
//!
//! [`BridgeMetrics`] is injected into every component that records; nothing
//! registers globally, so each test can build its own registry.

use std::time::Duration;

use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

use bridge_sync::SyncObserver;

/// All bridge metric handles. Cheap to clone; clones share the same series.
#[derive(Clone)]
pub struct BridgeMetrics {
    pub push_attempts: IntCounter,
    pub push_successes: IntCounter,
    pub push_failures: IntCounter,
    pub documents_processed: IntCounter,
    pub documents_skipped: IntCounter,
    pub batch_size: Histogram,
    pub batch_duration: Histogram,
    pub git_clone_duration: Histogram,
    pub git_push_duration: Histogram,
    pub store_query_duration: Histogram,
    pub store_update_duration: Histogram,
    pub errors: IntCounterVec,
    pub active_workers: IntGauge,
    pub queue_size: IntGauge,
}

impl BridgeMetrics {
    /// Create every metric and register it with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let metric = IntCounter::new(name, help)?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };
        let seconds = |name: &str, help: &str| -> Result<Histogram, prometheus::Error> {
            let metric = Histogram::with_opts(HistogramOpts::new(name, help))?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let metric = IntGauge::new(name, help)?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };

        let batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "github_bridge_batch_size",
                "Size of document batches processed",
            )
            .buckets(exponential_buckets(1.0, 2.0, 10)?),
        )?;
        registry.register(Box::new(batch_size.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new("github_bridge_errors_total", "Total errors by type"),
            &["type"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            push_attempts: counter(
                "github_bridge_push_attempts_total",
                "Total number of push attempts",
            )?,
            push_successes: counter(
                "github_bridge_push_successes_total",
                "Total number of successful pushes",
            )?,
            push_failures: counter(
                "github_bridge_push_failures_total",
                "Total number of failed pushes",
            )?,
            documents_processed: counter(
                "github_bridge_documents_processed_total",
                "Total number of documents processed",
            )?,
            documents_skipped: counter(
                "github_bridge_documents_skipped_total",
                "Total number of documents skipped",
            )?,
            batch_size,
            batch_duration: seconds(
                "github_bridge_batch_duration_seconds",
                "Time taken to process a push intent",
            )?,
            git_clone_duration: seconds(
                "github_bridge_git_clone_duration_seconds",
                "Time taken to clone repository",
            )?,
            git_push_duration: seconds(
                "github_bridge_git_push_duration_seconds",
                "Time taken to push changes",
            )?,
            store_query_duration: seconds(
                "github_bridge_mongo_query_duration_seconds",
                "Time taken for MongoDB queries",
            )?,
            store_update_duration: seconds(
                "github_bridge_mongo_update_duration_seconds",
                "Time taken for MongoDB updates",
            )?,
            errors,
            active_workers: gauge(
                "github_bridge_active_workers",
                "Number of active worker tasks",
            )?,
            queue_size: gauge(
                "github_bridge_queue_size",
                "Number of push intents waiting in the work queue",
            )?,
        })
    }

    /// Metrics backed by a private registry nobody scrapes.
    pub fn detached() -> Result<Self, prometheus::Error> {
        Self::new(&Registry::new())
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors.with_label_values(&[kind]).get()
    }
}

impl SyncObserver for BridgeMetrics {
    fn intent_started(&self) {
        self.push_attempts.inc();
    }

    fn intent_finished(&self, elapsed: Duration, succeeded: bool) {
        self.batch_duration.observe(elapsed.as_secs_f64());
        if succeeded {
            self.push_successes.inc();
        } else {
            self.push_failures.inc();
        }
    }

    fn documents_resolved(&self, count: usize) {
        self.documents_processed.inc_by(count as u64);
        self.batch_size.observe(count as f64);
    }

    fn documents_skipped(&self, count: usize) {
        self.documents_skipped.inc_by(count as u64);
    }

    fn clone_finished(&self, elapsed: Duration) {
        self.git_clone_duration.observe(elapsed.as_secs_f64());
    }

    fn push_finished(&self, elapsed: Duration) {
        self.git_push_duration.observe(elapsed.as_secs_f64());
    }

    fn store_query_finished(&self, elapsed: Duration) {
        self.store_query_duration.observe(elapsed.as_secs_f64());
    }

    fn store_update_finished(&self, elapsed: Duration) {
        self.store_update_duration.observe(elapsed.as_secs_f64());
    }

    fn error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }
}

/// The scrape registry together with the metrics registered on it.
pub struct MetricsRegistry {
    registry: Registry,
    metrics: BridgeMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = BridgeMetrics::new(&registry)?;
        Ok(Self { registry, metrics })
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Encode all metrics in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}
