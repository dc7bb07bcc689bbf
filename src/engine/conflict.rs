use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.duration_ms() <= 0 {
        return Err(EngineError::InvalidInput("window duration must be positive"));
    }
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidInput("timestamp out of range"));
    }
    if window.duration_ms() > MAX_WINDOW_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

/// The conflict test from the data model's core invariant: a slot is taken
/// for a window iff an active hold overlaps it. Half-open semantics — a hold
/// ending exactly at `window.start` does not conflict.
pub(crate) fn check_no_conflict(slot: &SlotState, window: &Window) -> Result<(), EngineError> {
    for hold in slot.overlapping(window) {
        if hold.blocks() {
            return Err(EngineError::Conflict(hold.id));
        }
    }
    Ok(())
}

/// Status gate applied under the slot write lock, after the cheap catalog
/// filter: occupancy and service state may have changed since enumeration.
pub(crate) fn check_accepts_holds(slot: &SlotState) -> Result<(), EngineError> {
    if slot.status.accepts_holds() {
        Ok(())
    } else {
        Err(EngineError::Conflict(slot.id))
    }
}
