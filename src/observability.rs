use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: assignment attempts. Labels: outcome.
pub const ASSIGNMENTS_TOTAL: &str = "valet_assignments_total";

/// Histogram: assignment latency in seconds.
pub const ASSIGN_DURATION_SECONDS: &str = "valet_assign_duration_seconds";

/// Histogram: candidates tried per assignment before a winner (or giving up).
pub const ASSIGN_CANDIDATES_TRIED: &str = "valet_assign_candidates_tried";

/// Counter: holds taken out of circulation. Labels: reason (cancelled, expired).
pub const HOLDS_RELEASED_TOTAL: &str = "valet_holds_released_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: sweeper passes completed.
pub const SWEEPS_TOTAL: &str = "valet_sweeps_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "valet_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "valet_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an assignment outcome to a short label for metrics.
pub fn assign_outcome_label(result: &Result<crate::engine::Assignment, EngineError>) -> &'static str {
    match result {
        Ok(_) => "assigned",
        Err(EngineError::NoSlotAvailable) => "no_slot",
        Err(EngineError::InvalidInput(_)) => "invalid_input",
        Err(EngineError::StorageUnavailable(_)) => "storage_unavailable",
        Err(EngineError::LimitExceeded(_)) => "limit_exceeded",
        Err(_) => "error",
    }
}
