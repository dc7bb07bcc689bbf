//! valet — a parking-slot reservation and auto-assignment engine.
//!
//! Callers never pick a slot. `Engine::assign` resolves the vehicle type,
//! walks the candidate slots of a location in deterministic order, and takes
//! the first one whose atomic hold creation wins; the hold locks the slot
//! until the booking's window begins, then confirmation, cancellation, or
//! the expiry sweeper lets it go. State is held per-slot behind async locks
//! and made durable through an append-only WAL with group commit.

pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod wal;

pub use directory::{Directory, StaticDirectory};
pub use engine::{Assignment, Engine, EngineError};
pub use model::{
    Event, FloorInfo, HoldInfo, HoldStatus, Ms, Requester, SlotInfo, SlotStatus, VehicleType,
    Window,
};
pub use notify::NotifyHub;
