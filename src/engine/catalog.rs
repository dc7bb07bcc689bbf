use ulid::Ulid;

use crate::model::*;

use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Candidate slots for (location, vehicle type): every slot on an active,
    /// type-matching floor of that location whose own status still accepts
    /// holds. Sorted by slot id — ULIDs give a stable, deterministic order,
    /// which is what makes "first match wins" well-defined and reproducible.
    ///
    /// Occupied and out-of-service slots are dropped here, before any
    /// overlap checking; the authoritative re-check happens again under the
    /// slot write lock at hold-creation time.
    pub async fn candidate_slots(
        &self,
        location_id: Ulid,
        vehicle_type: VehicleType,
    ) -> Vec<Ulid> {
        let mut out = Vec::new();
        let floor_ids: Vec<Ulid> = match self.location_floors.get(&location_id) {
            Some(ids) => ids.clone(),
            None => return out,
        };

        for floor_id in floor_ids {
            let structural_match = self
                .floors
                .get(&floor_id)
                .map(|meta| meta.active && meta.vehicle_type == vehicle_type)
                .unwrap_or(false);
            if !structural_match {
                continue;
            }
            let slot_ids: Vec<Ulid> = match self.floor_slots.get(&floor_id) {
                Some(ids) => ids.clone(),
                None => continue,
            };
            for slot_id in slot_ids {
                if let Some(entry) = self.slots.get(&slot_id) {
                    let slot = entry.value().clone();
                    drop(entry);
                    let guard = slot.read().await;
                    if guard.status.accepts_holds() {
                        out.push(slot_id);
                    }
                }
            }
        }

        out.sort();
        out
    }

    /// Read-only capacity query for UI and reporting. Counts candidate slots
    /// with no active hold overlapping the window — the same half-open
    /// overlap test assignment uses, never the floors' advisory counters.
    pub async fn available_slot_count(
        &self,
        location_id: Ulid,
        vehicle_type: VehicleType,
        window: Window,
    ) -> Result<usize, EngineError> {
        validate_window(&window)?;
        let mut count = 0;
        for slot_id in self.candidate_slots(location_id, vehicle_type).await {
            if let Some(slot) = self.get_slot(&slot_id) {
                let guard = slot.read().await;
                let conflicted = guard.overlapping(&window).any(HoldRecord::blocks);
                if !conflicted {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub fn list_floors(&self) -> Vec<FloorInfo> {
        self.floors
            .iter()
            .map(|entry| {
                let meta = entry.value();
                FloorInfo {
                    id: meta.id,
                    location_id: meta.location_id,
                    vehicle_type: meta.vehicle_type,
                    name: meta.name.clone(),
                    active: meta.active,
                    available_hint: meta.available_hint,
                }
            })
            .collect()
    }

    pub async fn list_slots(&self, floor_id: Ulid) -> Vec<SlotInfo> {
        let slot_ids: Vec<Ulid> = match self.floor_slots.get(&floor_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let mut out = Vec::with_capacity(slot_ids.len());
        for slot_id in slot_ids {
            if let Some(slot) = self.get_slot(&slot_id) {
                let guard = slot.read().await;
                out.push(SlotInfo {
                    id: guard.id,
                    floor_id: guard.floor_id,
                    code: guard.code.clone(),
                    vehicle_type: guard.vehicle_type,
                    status: guard.status,
                });
            }
        }
        out
    }

    pub async fn list_holds(&self, slot_id: Ulid) -> Vec<HoldInfo> {
        let Some(slot) = self.get_slot(&slot_id) else {
            return Vec::new();
        };
        let guard = slot.read().await;
        guard
            .holds
            .iter()
            .map(|h| hold_info(&guard, h))
            .collect()
    }

    pub async fn get_hold(&self, hold_id: Ulid) -> Option<HoldInfo> {
        let slot_id = self.slot_for_hold(&hold_id)?;
        let slot = self.get_slot(&slot_id)?;
        let guard = slot.read().await;
        guard.hold(hold_id).map(|h| hold_info(&guard, h))
    }
}

fn hold_info(slot: &SlotState, hold: &HoldRecord) -> HoldInfo {
    HoldInfo {
        id: hold.id,
        slot_id: slot.id,
        floor_id: slot.floor_id,
        requester: hold.requester,
        start: hold.window.start,
        end: hold.window.end,
        expires_at: hold.expires_at,
        reserved_at: hold.reserved_at,
        status: hold.status,
    }
}
