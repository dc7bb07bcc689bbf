use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open reservation window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn starting_at(start: Ms, duration_ms: Ms) -> Self {
        Self::new(start, start + duration_ms)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The sole conflict primitive. Back-to-back windows (`a.end == b.start`)
    /// do NOT overlap, so a slot freed at T is reusable for a window starting at T.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Vehicle classes a slot or floor can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleType {
    Car,
    Motorcycle,
    Van,
}

impl VehicleType {
    /// Case-insensitive parse; unknown names are the caller's problem.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "car" => Some(Self::Car),
            "motorcycle" | "bike" => Some(Self::Motorcycle),
            "van" => Some(Self::Van),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Van => "van",
        }
    }
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical state of a slot. `Occupied` and `OutOfService` are owned by the
/// outside world (entry/exit sensors, operators) and are never overridden by
/// reservation logic; `Available`/`Reserved` are derived from hold state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Reserved,
    Occupied,
    OutOfService,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Occupied => "occupied",
            Self::OutOfService => "out_of_service",
        }
    }

    /// Whether a new hold may be placed on a slot in this state.
    pub fn accepts_holds(&self) -> bool {
        matches!(self, Self::Available | Self::Reserved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    Active,
    Released,
    Expired,
    Confirmed,
}

impl HoldStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Who a hold was placed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub vehicle_id: Ulid,
    pub user_id: Ulid,
}

/// A provisional lock on a slot. Records are kept after they go terminal
/// (traceability); only the retention policy at compaction time destroys them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRecord {
    pub id: Ulid,
    pub requester: Requester,
    pub window: Window,
    pub expires_at: Ms,
    pub reserved_at: Ms,
    pub status: HoldStatus,
}

impl HoldRecord {
    /// Only `Active` holds participate in conflict detection.
    pub fn blocks(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// Lapsed: still `Active` but past its expiry (or its whole window).
    /// The sweeper turns these into `Expired`.
    pub fn is_lapsed(&self, now: Ms) -> bool {
        self.status == HoldStatus::Active && (self.expires_at <= now || self.window.end <= now)
    }
}

/// A physical parking slot plus every hold ever placed on it, sorted by
/// window start. This is the lock unit: one `RwLock<SlotState>` per slot.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub floor_id: Ulid,
    pub code: String,
    pub vehicle_type: VehicleType,
    pub status: SlotStatus,
    pub holds: Vec<HoldRecord>,
}

impl SlotState {
    pub fn new(id: Ulid, floor_id: Ulid, code: String, vehicle_type: VehicleType) -> Self {
        Self {
            id,
            floor_id,
            code,
            vehicle_type,
            status: SlotStatus::Available,
            holds: Vec::new(),
        }
    }

    /// Insert a hold maintaining sort order by window.start.
    pub fn insert_hold(&mut self, hold: HoldRecord) {
        let pos = self
            .holds
            .binary_search_by_key(&hold.window.start, |h| h.window.start)
            .unwrap_or_else(|e| e);
        self.holds.insert(pos, hold);
    }

    pub fn hold(&self, id: Ulid) -> Option<&HoldRecord> {
        self.holds.iter().find(|h| h.id == id)
    }

    pub fn hold_mut(&mut self, id: Ulid) -> Option<&mut HoldRecord> {
        self.holds.iter_mut().find(|h| h.id == id)
    }

    /// Only holds whose window overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &HoldRecord> {
        let right_bound = self
            .holds
            .partition_point(|h| h.window.start < query.end);
        self.holds[..right_bound]
            .iter()
            .filter(move |h| h.window.end > query.start)
    }

    pub fn has_blocking_hold(&self) -> bool {
        self.holds.iter().any(HoldRecord::blocks)
    }

    /// The status a slot falls back to when its `Reserved` state is in
    /// question: `Reserved` while at least one active hold remains,
    /// `Available` otherwise. Never applied over `Occupied`/`OutOfService`.
    pub fn derived_status(&self) -> SlotStatus {
        if self.has_blocking_hold() {
            SlotStatus::Reserved
        } else {
            SlotStatus::Available
        }
    }
}

/// Floor-level metadata. `available_hint` is a denormalized count of
/// `Available` slots for UI/reporting; allocation never trusts it.
#[derive(Debug, Clone)]
pub struct FloorMeta {
    pub id: Ulid,
    pub location_id: Ulid,
    pub vehicle_type: VehicleType,
    pub name: Option<String>,
    pub active: bool,
    pub available_hint: i64,
}

/// The event types — flat, no nesting. This is the WAL record format and
/// the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FloorRegistered {
        id: Ulid,
        location_id: Ulid,
        vehicle_type: VehicleType,
        name: Option<String>,
        active: bool,
    },
    FloorActiveChanged {
        id: Ulid,
        active: bool,
    },
    SlotRegistered {
        id: Ulid,
        floor_id: Ulid,
        code: String,
        vehicle_type: VehicleType,
    },
    SlotServiceChanged {
        id: Ulid,
        out_of_service: bool,
    },
    /// Entry sensor fired — the slot is physically taken.
    VehicleEntered {
        slot_id: Ulid,
    },
    /// Exit sensor fired — the slot is physically free again.
    VehicleExited {
        slot_id: Ulid,
    },
    HoldPlaced {
        id: Ulid,
        slot_id: Ulid,
        floor_id: Ulid,
        requester: Requester,
        window: Window,
        expires_at: Ms,
        reserved_at: Ms,
    },
    HoldReleased {
        id: Ulid,
        slot_id: Ulid,
    },
    HoldExpired {
        id: Ulid,
        slot_id: Ulid,
    },
    HoldConfirmed {
        id: Ulid,
        slot_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorInfo {
    pub id: Ulid,
    pub location_id: Ulid,
    pub vehicle_type: VehicleType,
    pub name: Option<String>,
    pub active: bool,
    pub available_hint: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub floor_id: Ulid,
    pub code: String,
    pub vehicle_type: VehicleType,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub floor_id: Ulid,
    pub requester: Requester,
    pub start: Ms,
    pub end: Ms,
    pub expires_at: Ms,
    pub reserved_at: Ms,
    pub status: HoldStatus,
}
