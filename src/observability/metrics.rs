//! # Metrics
//!
//! Prometheus metrics for monitoring the daemon.
//!
//! ## Metrics Exposed
//!
//! - `kubed_watch_events_total` - Watch events dispatched, by kind and event type
//! - `kubed_watch_restarts_total` - Watch stream restarts, by kind
//! - `kubed_handler_errors_total` - Handler failures, by handler
//! - `kubed_reconciliations_total` - Total number of reconciliation passes
//! - `kubed_reconciliations_coalesced_total` - Triggers folded into a queued pass
//! - `kubed_reconciliation_errors_total` - Total number of failed reconciliation passes
//! - `kubed_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `kubed_replica_writes_total` - Replica writes, by operation
//! - `kubed_trash_snapshots_total` - Snapshots written to the recycle bin
//! - `kubed_trash_purged_total` - Snapshots purged after the retention window

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "kubed_watch_events_total",
            "Watch events dispatched to handlers by kind and event type",
        ),
        &["kind", "event"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "kubed_watch_restarts_total",
            "Watch stream restarts by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static HANDLER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "kubed_handler_errors_total",
            "Errors returned by event handlers",
        ),
        &["handler"],
    )
    .expect("Failed to create HANDLER_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kubed_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATIONS_COALESCED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kubed_reconciliations_coalesced_total",
        "Reconciliation triggers folded into an already queued pass",
    )
    .expect("Failed to create RECONCILIATIONS_COALESCED_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kubed_reconciliation_errors_total",
        "Total number of reconciliation passes that failed",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "kubed_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REPLICA_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "kubed_replica_writes_total",
            "Replica writes issued by operation (create, update, delete)",
        ),
        &["operation"],
    )
    .expect("Failed to create REPLICA_WRITES_TOTAL metric - this should never happen")
});

static TRASH_SNAPSHOTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kubed_trash_snapshots_total",
        "Snapshots written to the recycle bin",
    )
    .expect("Failed to create TRASH_SNAPSHOTS_TOTAL metric - this should never happen")
});

static TRASH_PURGED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kubed_trash_purged_total",
        "Snapshots purged after the retention window elapsed",
    )
    .expect("Failed to create TRASH_PURGED_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HANDLER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_COALESCED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REPLICA_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRASH_SNAPSHOTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRASH_PURGED_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_watch_events(kind: &str, event: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[kind, event]).inc();
}

pub fn increment_watch_restarts(kind: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_handler_errors(handler: &str) {
    HANDLER_ERRORS_TOTAL.with_label_values(&[handler]).inc();
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliations_coalesced() {
    RECONCILIATIONS_COALESCED_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_replica_writes(operation: &str) {
    REPLICA_WRITES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_trash_snapshots() {
    TRASH_SNAPSHOTS_TOTAL.inc();
}

pub fn increment_trash_purged(count: usize) {
    TRASH_PURGED_TOTAL.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}
