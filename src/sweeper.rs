use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{Engine, EngineError, now_ms};
use crate::model::Ms;

/// Design cadence for production deployments.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// One sweep pass: expire every lapsed hold, returning how many were
/// released. Idempotent — a hold someone else already finished comes back as
/// `NotFound` and is skipped, so overlapping passes cannot double-release.
pub async fn sweep_once(engine: &Engine, now: Ms) -> usize {
    let lapsed = engine.collect_lapsed_holds(now);
    let mut released = 0usize;
    for (hold_id, slot_id) in lapsed {
        match engine.expire_hold(hold_id).await {
            Ok(()) => {
                released += 1;
                tracing::debug!("expired hold {hold_id} on slot {slot_id}");
            }
            // An explicit release or a concurrent sweep got there first
            Err(EngineError::NotFound(_)) => {}
            // A single hold's failure never halts the pass
            Err(e) => warn!("failed to expire hold {hold_id}: {e}"),
        }
    }
    if released > 0 {
        metrics::counter!(
            crate::observability::HOLDS_RELEASED_TOTAL,
            "reason" => "expired"
        )
        .increment(released as u64);
    }
    metrics::counter!(crate::observability::SWEEPS_TOTAL).increment(1);
    released
}

/// Background task that periodically reclaims slots from lapsed holds.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let released = sweep_once(&engine, now_ms()).await;
        if released > 0 {
            info!("sweep released {released} lapsed holds");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
