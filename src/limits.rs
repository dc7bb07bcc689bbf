//! Hard limits. Everything here exists to bound memory and keep a single
//! misbehaving caller from wedging an engine.

use std::time::Duration;

use crate::model::Ms;

pub const MAX_FLOORS: usize = 4_096;
pub const MAX_SLOTS_PER_FLOOR: usize = 10_000;
pub const MAX_HOLDS_PER_SLOT: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CODE_LEN: usize = 64;

/// 2000-01-01T00:00:00Z. Anything earlier is a caller bug.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single reservation window: 30 days.
pub const MAX_WINDOW_DURATION_MS: Ms = 30 * 24 * 3_600_000;

/// Longest duration accepted by `assign`, in whole hours.
pub const MAX_DURATION_HOURS: i64 = MAX_WINDOW_DURATION_MS / 3_600_000;

/// Upper bound on a single WAL commit wait. A timed-out append is reported
/// as storage trouble for that one operation; nothing in the engine blocks
/// indefinitely on it.
pub const STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal hold records older than this (measured from window end) are
/// pruned when the WAL is compacted. This is the retention policy; nothing
/// else destroys hold records.
pub const HOLD_RETENTION_MS: Ms = 30 * 24 * 3_600_000;
