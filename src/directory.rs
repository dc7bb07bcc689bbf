//! Collaborator interfaces. The engine never owns vehicle registration or
//! per-location policy; it asks the surrounding system through this trait.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::VehicleType;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a vehicle's type. `None` means the vehicle is unknown and the
    /// request is rejected as the caller's fault.
    async fn vehicle_type(&self, vehicle_id: Ulid) -> Option<VehicleType>;

    /// Whether this location lets the engine pick slots at all, versus a
    /// user-driven slot picker in the surrounding app.
    async fn auto_assign_enabled(&self, location_id: Ulid) -> bool;
}

/// Fixed in-memory directory. Useful for tests and single-operator
/// deployments where the fleet is known at startup.
#[derive(Default)]
pub struct StaticDirectory {
    vehicles: HashMap<Ulid, VehicleType>,
    manual_locations: HashSet<Ulid>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vehicle(mut self, vehicle_id: Ulid, vehicle_type: VehicleType) -> Self {
        self.vehicles.insert(vehicle_id, vehicle_type);
        self
    }

    /// Mark a location as user-picker only (auto-assignment off).
    pub fn with_manual_location(mut self, location_id: Ulid) -> Self {
        self.manual_locations.insert(location_id);
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn vehicle_type(&self, vehicle_id: Ulid) -> Option<VehicleType> {
        self.vehicles.get(&vehicle_id).copied()
    }

    async fn auto_assign_enabled(&self, location_id: Ulid) -> bool {
        !self.manual_locations.contains(&location_id)
    }
}
