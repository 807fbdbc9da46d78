//! Vehicle/client directory collaborator.
//!
//! The directory owns vehicle identity. The occupancy core asks it for a
//! stable key before check-in and never creates vehicles on its own; a
//! directory may choose to register a first-time vehicle as part of the
//! lookup.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::model::{ClientRef, Plate, Vehicle, VehicleCategory};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("vehicle rejected: {0}")]
    Rejected(String),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    /// Resolve `plate` to a vehicle. `category` and `client` describe the
    /// vehicle as presented at the gate; a known vehicle keeps its cached
    /// category.
    async fn resolve(
        &self,
        plate: &Plate,
        category: VehicleCategory,
        client: Option<&ClientRef>,
    ) -> Result<Vehicle, DirectoryError>;
}

/// In-process directory. With `register_unknown` a first-time plate is
/// added on lookup; without it unknown plates are rejected.
pub struct InMemoryDirectory {
    vehicles: DashMap<Plate, Vehicle>,
    register_unknown: bool,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InMemoryDirectory {
    pub fn new(register_unknown: bool) -> Self {
        Self {
            vehicles: DashMap::new(),
            register_unknown,
        }
    }

    pub fn register(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.plate.clone(), vehicle);
    }

    pub fn get(&self, plate: &Plate) -> Option<Vehicle> {
        self.vehicles.get(plate).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

#[async_trait]
impl VehicleDirectory for InMemoryDirectory {
    async fn resolve(
        &self,
        plate: &Plate,
        category: VehicleCategory,
        client: Option<&ClientRef>,
    ) -> Result<Vehicle, DirectoryError> {
        if let Some(known) = self.get(plate) {
            return Ok(known);
        }
        if !self.register_unknown {
            return Err(DirectoryError::Rejected(format!("unknown plate {plate}")));
        }
        let vehicle = Vehicle {
            plate: plate.clone(),
            category,
            client: client.cloned(),
        };
        // Two gates may race on the same new plate; first registration wins.
        let entry = self
            .vehicles
            .entry(plate.clone())
            .or_insert_with(|| vehicle);
        tracing::debug!("directory resolved {plate}");
        Ok(entry.value().clone())
    }
}
