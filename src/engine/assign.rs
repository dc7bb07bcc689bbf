use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_accepts_holds, check_no_conflict, now_ms, validate_window};
use super::{Assignment, Engine, EngineError, WalCommand};

const HOUR_MS: Ms = 3_600_000;

impl Engine {
    // ── Registration ─────────────────────────────────────────

    pub async fn register_floor(
        &self,
        id: Ulid,
        location_id: Ulid,
        vehicle_type: VehicleType,
        name: Option<String>,
        active: bool,
    ) -> Result<(), EngineError> {
        if self.floors.len() >= MAX_FLOORS {
            return Err(EngineError::LimitExceeded("too many floors"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("floor name too long"));
        }
        if self.floors.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::FloorRegistered {
            id,
            location_id,
            vehicle_type,
            name: name.clone(),
            active,
        };
        self.wal_append(&event).await?;
        self.floors.insert(
            id,
            FloorMeta {
                id,
                location_id,
                vehicle_type,
                name,
                active,
                available_hint: 0,
            },
        );
        self.location_floors.entry(location_id).or_default().push(id);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn set_floor_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        if !self.floors.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::FloorActiveChanged { id, active };
        self.wal_append(&event).await?;
        if let Some(mut meta) = self.floors.get_mut(&id) {
            meta.active = active;
        }
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn register_slot(
        &self,
        id: Ulid,
        floor_id: Ulid,
        code: &str,
    ) -> Result<(), EngineError> {
        if code.len() > MAX_CODE_LEN {
            return Err(EngineError::LimitExceeded("slot code too long"));
        }
        // Slots serve whatever their floor serves.
        let vehicle_type = self
            .floors
            .get(&floor_id)
            .map(|meta| meta.vehicle_type)
            .ok_or(EngineError::NotFound(floor_id))?;
        if let Some(siblings) = self.floor_slots.get(&floor_id)
            && siblings.len() >= MAX_SLOTS_PER_FLOOR
        {
            return Err(EngineError::LimitExceeded("too many slots on floor"));
        }
        if self.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SlotRegistered {
            id,
            floor_id,
            code: code.to_string(),
            vehicle_type,
        };
        self.wal_append(&event).await?;
        let slot = SlotState::new(id, floor_id, code.to_string(), vehicle_type);
        self.slots.insert(id, Arc::new(RwLock::new(slot)));
        self.floor_slots.entry(floor_id).or_default().push(id);
        self.note_status_change(floor_id, None, SlotStatus::Available);
        self.notify.send(floor_id, &event);
        Ok(())
    }

    // ── Occupancy ground truth ───────────────────────────────

    /// Entry sensor fired: the slot is physically taken. Never second-guessed.
    pub async fn record_entry(&self, slot_id: Ulid) -> Result<(), EngineError> {
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        let event = Event::VehicleEntered { slot_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Exit sensor fired: the slot is physically free; its reservation state
    /// is recomputed from whatever active holds remain.
    pub async fn record_exit(&self, slot_id: Ulid) -> Result<(), EngineError> {
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        let event = Event::VehicleExited { slot_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_slot_service(
        &self,
        slot_id: Ulid,
        out_of_service: bool,
    ) -> Result<(), EngineError> {
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        let event = Event::SlotServiceChanged {
            id: slot_id,
            out_of_service,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Holds ────────────────────────────────────────────────

    /// Atomically place a hold on one specific slot. This is the single
    /// commit point of the whole engine: status gate, overlap re-check, WAL
    /// append and in-memory apply all happen under the slot's write lock.
    /// The loser of a race gets `Conflict` and no mutation.
    pub async fn place_hold(
        &self,
        id: Ulid,
        slot_id: Ulid,
        requester: Requester,
        window: Window,
        expires_at: Ms,
    ) -> Result<(), EngineError> {
        validate_window(&window)?;
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        if guard.holds.len() >= MAX_HOLDS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many holds on slot"));
        }

        check_accepts_holds(&guard)?;
        check_no_conflict(&guard, &window)?;

        let event = Event::HoldPlaced {
            id,
            slot_id,
            floor_id: guard.floor_id,
            requester,
            window,
            expires_at,
            reserved_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Auto-assignment: pick a slot for the requester without them ever
    /// seeing one. Walks the candidates in deterministic order and takes the
    /// first whose atomic hold creation succeeds — attempt-and-advance, not
    /// check-then-commit, so two simultaneous requesters can never both win
    /// the same "free" slot.
    pub async fn assign(
        &self,
        location_id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        window_start: Ms,
        duration_hours: i64,
    ) -> Result<Assignment, EngineError> {
        let started = Instant::now();
        let result = self
            .assign_inner(location_id, vehicle_id, user_id, window_start, duration_hours)
            .await;
        metrics::counter!(
            crate::observability::ASSIGNMENTS_TOTAL,
            "outcome" => crate::observability::assign_outcome_label(&result)
        )
        .increment(1);
        metrics::histogram!(crate::observability::ASSIGN_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn assign_inner(
        &self,
        location_id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        window_start: Ms,
        duration_hours: i64,
    ) -> Result<Assignment, EngineError> {
        if duration_hours <= 0 {
            return Err(EngineError::InvalidInput("duration must be positive"));
        }
        if duration_hours > MAX_DURATION_HOURS {
            return Err(EngineError::LimitExceeded("duration too long"));
        }
        let window = Window::starting_at(window_start, duration_hours * HOUR_MS);
        validate_window(&window)?;

        let vehicle_type = self
            .directory
            .vehicle_type(vehicle_id)
            .await
            .ok_or(EngineError::InvalidInput("unknown vehicle"))?;
        if !self.directory.auto_assign_enabled(location_id).await {
            return Err(EngineError::InvalidInput(
                "auto-assignment disabled for location",
            ));
        }

        let requester = Requester { vehicle_id, user_id };
        let candidates = self.candidate_slots(location_id, vehicle_type).await;

        let mut tried = 0usize;
        let mut storage_failure: Option<String> = None;
        for slot_id in candidates {
            tried += 1;
            let hold_id = Ulid::new();
            // The hold exists only to bridge "now" until the booking's own
            // window begins, so it expires at the window start.
            match self
                .place_hold(hold_id, slot_id, requester, window, window.start)
                .await
            {
                Ok(()) => {
                    metrics::histogram!(crate::observability::ASSIGN_CANDIDATES_TRIED)
                        .record(tried as f64);
                    tracing::debug!("assigned slot {slot_id} to {user_id} (hold {hold_id})");
                    return Ok(Assignment { slot_id, hold_id });
                }
                // Raced, newly occupied, or genuinely overlapping: this
                // candidate only. Move on.
                Err(EngineError::Conflict(_)) => continue,
                // A storage fault is also contained to the candidate, but if
                // nobody wins we must not report a clean NoSlotAvailable —
                // the engine cannot know whether this hold committed.
                Err(EngineError::StorageUnavailable(e)) => {
                    tracing::warn!("hold attempt on slot {slot_id} failed on storage: {e}");
                    storage_failure = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        metrics::histogram!(crate::observability::ASSIGN_CANDIDATES_TRIED).record(tried as f64);
        match storage_failure {
            Some(e) => Err(EngineError::StorageUnavailable(e)),
            None => Err(EngineError::NoSlotAvailable),
        }
    }

    /// Explicit cancellation from the booking flow. Idempotent: a second
    /// release of the same hold answers `NotFound` and changes nothing.
    pub async fn release(&self, hold_id: Ulid) -> Result<(), EngineError> {
        self.finish_hold_as(hold_id, HoldStatus::Released).await?;
        metrics::counter!(
            crate::observability::HOLDS_RELEASED_TOTAL,
            "reason" => "cancelled"
        )
        .increment(1);
        Ok(())
    }

    /// Sweeper-only transition for lapsed holds.
    pub async fn expire_hold(&self, hold_id: Ulid) -> Result<(), EngineError> {
        self.finish_hold_as(hold_id, HoldStatus::Expired).await
    }

    /// The booking went through to occupancy; the provisional lock has done
    /// its job. The `Occupied` status itself arrives via the entry sensor.
    pub async fn confirm(&self, hold_id: Ulid) -> Result<(), EngineError> {
        self.finish_hold_as(hold_id, HoldStatus::Confirmed).await
    }

    async fn finish_hold_as(&self, hold_id: Ulid, next: HoldStatus) -> Result<(), EngineError> {
        let (slot_id, mut guard) = self.resolve_hold_write(&hold_id).await?;
        match guard.hold(hold_id) {
            None => return Err(EngineError::NotFound(hold_id)),
            Some(h) if h.status.is_terminal() => return Err(EngineError::NotFound(hold_id)),
            Some(_) => {}
        }
        let event = match next {
            HoldStatus::Released => Event::HoldReleased { id: hold_id, slot_id },
            HoldStatus::Expired => Event::HoldExpired { id: hold_id, slot_id },
            HoldStatus::Confirmed => Event::HoldConfirmed { id: hold_id, slot_id },
            HoldStatus::Active => unreachable!("active is not a terminal status"),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Holds past their expiry (or whole window) that are still active.
    /// Contended slots are skipped — the next sweep catches them.
    pub fn collect_lapsed_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut lapsed = Vec::new();
        for entry in self.slots.iter() {
            let slot = entry.value().clone();
            if let Ok(guard) = slot.try_read() {
                for hold in &guard.holds {
                    if hold.is_lapsed(now) {
                        lapsed.push((hold.id, guard.id));
                    }
                }
            }
        }
        lapsed
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current
    /// state. Terminal hold records past the retention horizon are dropped
    /// from the snapshot and pruned from memory afterwards.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let now = now_ms();
        let mut events = Vec::new();

        // Floors first so slot registration replays against known floors.
        for entry in self.floors.iter() {
            let meta = entry.value();
            events.push(Event::FloorRegistered {
                id: meta.id,
                location_id: meta.location_id,
                vehicle_type: meta.vehicle_type,
                name: meta.name.clone(),
                active: meta.active,
            });
        }

        let slot_ids: Vec<Ulid> = self.slots.iter().map(|e| *e.key()).collect();
        let mut pruned: HashSet<Ulid> = HashSet::new();

        for slot_id in &slot_ids {
            let Some(slot) = self.get_slot(slot_id) else {
                continue;
            };
            let guard = slot.read().await;
            events.push(Event::SlotRegistered {
                id: guard.id,
                floor_id: guard.floor_id,
                code: guard.code.clone(),
                vehicle_type: guard.vehicle_type,
            });
            match guard.status {
                SlotStatus::OutOfService => events.push(Event::SlotServiceChanged {
                    id: guard.id,
                    out_of_service: true,
                }),
                SlotStatus::Occupied => {
                    events.push(Event::VehicleEntered { slot_id: guard.id })
                }
                SlotStatus::Available | SlotStatus::Reserved => {}
            }
            for hold in &guard.holds {
                let keep =
                    !hold.status.is_terminal() || hold.window.end + HOLD_RETENTION_MS > now;
                if !keep {
                    pruned.insert(hold.id);
                    continue;
                }
                events.push(Event::HoldPlaced {
                    id: hold.id,
                    slot_id: guard.id,
                    floor_id: guard.floor_id,
                    requester: hold.requester,
                    window: hold.window,
                    expires_at: hold.expires_at,
                    reserved_at: hold.reserved_at,
                });
                match hold.status {
                    HoldStatus::Released => events.push(Event::HoldReleased {
                        id: hold.id,
                        slot_id: guard.id,
                    }),
                    HoldStatus::Expired => events.push(Event::HoldExpired {
                        id: hold.id,
                        slot_id: guard.id,
                    }),
                    HoldStatus::Confirmed => events.push(Event::HoldConfirmed {
                        id: hold.id,
                        slot_id: guard.id,
                    }),
                    HoldStatus::Active => {}
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

        // Snapshot committed; retire the pruned records. Terminal status is
        // final, so nothing can resurrect them between snapshot and here.
        if !pruned.is_empty() {
            for slot_id in &slot_ids {
                let Some(slot) = self.get_slot(slot_id) else {
                    continue;
                };
                let mut guard = slot.write().await;
                guard.holds.retain(|h| !pruned.contains(&h.id));
            }
            for hold_id in &pruned {
                self.drop_hold_index(hold_id);
            }
        }
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
