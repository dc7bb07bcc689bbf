mod assign;
mod catalog;
mod conflict;
mod error;

pub use error::EngineError;
pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::directory::Directory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// What a successful `assign` hands back: the slot that was won and the hold
/// that locks it until the booking's window begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub slot_id: Ulid,
    pub hold_id: Ulid,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the current batch first, then the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation engine: every floor, slot and hold of one deployment,
/// durably backed by a WAL. Slots are the lock unit — each hold attempt is
/// its own short write-lock transaction, never a lock across the whole
/// candidate search.
pub struct Engine {
    slots: DashMap<Ulid, SharedSlotState>,
    floors: DashMap<Ulid, FloorMeta>,
    /// Floor → slot ids, insertion order.
    floor_slots: DashMap<Ulid, Vec<Ulid>>,
    /// Location → floor ids.
    location_floors: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: hold id → slot id.
    hold_to_slot: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn Directory>,
}

/// Apply a slot-level event directly to a SlotState (no locking — the caller
/// holds the slot's write lock).
fn apply_to_slot(slot: &mut SlotState, event: &Event, hold_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SlotServiceChanged { out_of_service, .. } => {
            slot.status = if *out_of_service {
                SlotStatus::OutOfService
            } else {
                slot.derived_status()
            };
        }
        // Occupancy events are ground truth from physical sensors; the
        // engine records them verbatim and recomputes on exit.
        Event::VehicleEntered { .. } => {
            slot.status = SlotStatus::Occupied;
        }
        Event::VehicleExited { .. } => {
            if slot.status == SlotStatus::Occupied {
                slot.status = slot.derived_status();
            }
        }
        Event::HoldPlaced {
            id,
            slot_id,
            requester,
            window,
            expires_at,
            reserved_at,
            ..
        } => {
            slot.insert_hold(HoldRecord {
                id: *id,
                requester: *requester,
                window: *window,
                expires_at: *expires_at,
                reserved_at: *reserved_at,
                status: HoldStatus::Active,
            });
            if slot.status == SlotStatus::Available {
                slot.status = SlotStatus::Reserved;
            }
            hold_index.insert(*id, *slot_id);
        }
        Event::HoldReleased { id, .. } => finish_hold(slot, *id, HoldStatus::Released),
        Event::HoldExpired { id, .. } => finish_hold(slot, *id, HoldStatus::Expired),
        Event::HoldConfirmed { id, .. } => finish_hold(slot, *id, HoldStatus::Confirmed),
        // Floor/slot registration is handled at the map level, not here
        Event::FloorRegistered { .. }
        | Event::FloorActiveChanged { .. }
        | Event::SlotRegistered { .. } => {}
    }
}

/// Transition a hold to a terminal status and recompute the slot's status
/// from the holds that remain. A slot flips back to `Available` only when no
/// active hold is left — never assumed from single-ownership history.
fn finish_hold(slot: &mut SlotState, id: Ulid, status: HoldStatus) {
    if let Some(hold) = slot.hold_mut(id) {
        hold.status = status;
    }
    if slot.status == SlotStatus::Reserved {
        slot.status = slot.derived_status();
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn Directory>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            floors: DashMap::new(),
            floor_slots: DashMap::new(),
            location_floors: DashMap::new(),
            hold_to_slot: DashMap::new(),
            wal_tx,
            notify,
            directory,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::FloorRegistered {
                    id,
                    location_id,
                    vehicle_type,
                    name,
                    active,
                } => {
                    engine.floors.insert(
                        *id,
                        FloorMeta {
                            id: *id,
                            location_id: *location_id,
                            vehicle_type: *vehicle_type,
                            name: name.clone(),
                            active: *active,
                            available_hint: 0,
                        },
                    );
                    engine.location_floors.entry(*location_id).or_default().push(*id);
                }
                Event::FloorActiveChanged { id, active } => {
                    if let Some(mut meta) = engine.floors.get_mut(id) {
                        meta.active = *active;
                    }
                }
                Event::SlotRegistered {
                    id,
                    floor_id,
                    code,
                    vehicle_type,
                } => {
                    let slot = SlotState::new(*id, *floor_id, code.clone(), *vehicle_type);
                    engine.slots.insert(*id, Arc::new(RwLock::new(slot)));
                    engine.floor_slots.entry(*floor_id).or_default().push(*id);
                    engine.note_status_change(*floor_id, None, SlotStatus::Available);
                }
                other => {
                    if let Some(slot_id) = event_slot_id(other)
                        && let Some(entry) = engine.slots.get(&slot_id)
                    {
                        let slot_arc = entry.clone();
                        drop(entry);
                        let mut guard = slot_arc.try_write().expect("replay: uncontended write");
                        let before = guard.status;
                        apply_to_slot(&mut guard, other, &engine.hold_to_slot);
                        let after = guard.status;
                        if before != after {
                            engine.note_status_change(guard.floor_id, Some(before), after);
                        }
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    /// Bounded: a commit that cannot land within `STORAGE_TIMEOUT` is
    /// reported as storage trouble rather than blocking the caller.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let commit = async {
            self.wal_tx
                .send(WalCommand::Append {
                    event: event.clone(),
                    response: tx,
                })
                .await
                .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
        };
        tokio::time::timeout(crate::limits::STORAGE_TIMEOUT, commit)
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::StorageUnavailable("WAL append timed out".into()))
            })
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_for_hold(&self, hold_id: &Ulid) -> Option<Ulid> {
        self.hold_to_slot.get(hold_id).map(|e| *e.value())
    }

    /// WAL-append + apply + advisory counter + notify in one call. The slot
    /// write lock the caller holds is what makes hold-existence and slot
    /// status change land together — nothing observes one without the other.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let before = slot.status;
        apply_to_slot(slot, event, &self.hold_to_slot);
        let after = slot.status;
        if before != after {
            self.note_status_change(slot.floor_id, Some(before), after);
        }
        self.notify.send(slot.floor_id, event);
        Ok(())
    }

    /// Keep the floor's advisory available-slot counter in step with status
    /// flips. The counter is a UI hint; allocation never reads it.
    fn note_status_change(&self, floor_id: Ulid, before: Option<SlotStatus>, after: SlotStatus) {
        let Some(mut meta) = self.floors.get_mut(&floor_id) else {
            return;
        };
        if before == Some(SlotStatus::Available) {
            meta.available_hint -= 1;
        }
        if after == SlotStatus::Available {
            meta.available_hint += 1;
        }
    }

    /// Lookup hold → slot, get the slot, acquire its write lock.
    pub(super) async fn resolve_hold_write(
        &self,
        hold_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let slot_id = self
            .slot_for_hold(hold_id)
            .ok_or(EngineError::NotFound(*hold_id))?;
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = slot.write_owned().await;
        Ok((slot_id, guard))
    }

    pub(super) fn drop_hold_index(&self, hold_id: &Ulid) {
        self.hold_to_slot.remove(hold_id);
    }
}

/// Extract the slot id from a slot-level event.
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotServiceChanged { id, .. } => Some(*id),
        Event::VehicleEntered { slot_id } | Event::VehicleExited { slot_id } => Some(*slot_id),
        Event::HoldPlaced { slot_id, .. }
        | Event::HoldReleased { slot_id, .. }
        | Event::HoldExpired { slot_id, .. }
        | Event::HoldConfirmed { slot_id, .. } => Some(*slot_id),
        Event::FloorRegistered { .. }
        | Event::FloorActiveChanged { .. }
        | Event::SlotRegistered { .. } => None,
    }
}
