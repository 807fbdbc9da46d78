use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("space not found: {0}")]
    NotFound(SpaceCode),
    #[error("space already exists: {0}")]
    AlreadyExists(SpaceCode),
    #[error("space {code} is {status}")]
    Conflict { code: SpaceCode, status: SpaceStatus },
    #[error("space {code} is {status}, expected {expected}")]
    InvalidState {
        code: SpaceCode,
        status: SpaceStatus,
        expected: &'static str,
    },
}

/// Owns the space inventory and each space's status.
///
/// Every method is a single read or a single per-entry read-modify-write, so
/// writes are visible to the next read immediately. Sequences spanning
/// several calls are serialized by the caller.
pub struct SpaceRegistry {
    spaces: DashMap<SpaceCode, ParkingSpace>,
}

impl Default for SpaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self {
            spaces: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn get(&self, code: &str) -> Result<ParkingSpace, RegistryError> {
        self.spaces
            .get(code)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))
    }

    /// All spaces, ordered by code.
    pub fn list(&self) -> Vec<ParkingSpace> {
        let mut spaces: Vec<ParkingSpace> = self.spaces.iter().map(|e| e.value().clone()).collect();
        spaces.sort_by(|a, b| a.code.cmp(&b.code));
        spaces
    }

    /// Available spaces accepting `category`, ordered by code.
    pub fn list_available(&self, category: VehicleCategory) -> Vec<ParkingSpace> {
        let mut spaces: Vec<ParkingSpace> = self
            .spaces
            .iter()
            .filter(|e| e.category == category && e.status == SpaceStatus::Available)
            .map(|e| e.value().clone())
            .collect();
        spaces.sort_by(|a, b| a.code.cmp(&b.code));
        spaces
    }

    pub fn insert(&self, space: ParkingSpace) -> Result<(), RegistryError> {
        match self.spaces.entry(space.code.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(space.code)),
            Entry::Vacant(slot) => {
                slot.insert(space);
                Ok(())
            }
        }
    }

    pub fn mark_occupied(&self, code: &str) -> Result<(), RegistryError> {
        let mut space = self
            .spaces
            .get_mut(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;
        if space.status != SpaceStatus::Available {
            return Err(RegistryError::Conflict {
                code: code.to_string(),
                status: space.status,
            });
        }
        space.status = SpaceStatus::Occupied;
        Ok(())
    }

    pub fn mark_available(&self, code: &str) -> Result<(), RegistryError> {
        let mut space = self
            .spaces
            .get_mut(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;
        if space.status != SpaceStatus::Occupied {
            return Err(RegistryError::InvalidState {
                code: code.to_string(),
                status: space.status,
                expected: "occupied",
            });
        }
        space.status = SpaceStatus::Available;
        Ok(())
    }

    /// Administrative status change among available, reserved and
    /// out-of-service. Occupancy is never set or cleared here.
    pub fn set_status(&self, code: &str, status: SpaceStatus) -> Result<SpaceStatus, RegistryError> {
        let mut space = self
            .spaces
            .get_mut(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;
        if status == SpaceStatus::Occupied || space.status == SpaceStatus::Occupied {
            return Err(RegistryError::InvalidState {
                code: code.to_string(),
                status: space.status,
                expected: "not occupied",
            });
        }
        let previous = space.status;
        space.status = status;
        Ok(previous)
    }

    pub fn remove(&self, code: &str) -> Result<ParkingSpace, RegistryError> {
        let status = self.get(code)?.status;
        if status == SpaceStatus::Occupied {
            return Err(RegistryError::InvalidState {
                code: code.to_string(),
                status,
                expected: "not occupied",
            });
        }
        self.spaces
            .remove_if(code, |_, s| s.status != SpaceStatus::Occupied)
            .map(|(_, s)| s)
            .ok_or_else(|| RegistryError::InvalidState {
                code: code.to_string(),
                status: SpaceStatus::Occupied,
                expected: "not occupied",
            })
    }

    /// Replay-only: force a status without transition checks.
    pub(crate) fn force_status(&self, code: &str, status: SpaceStatus) {
        if let Some(mut space) = self.spaces.get_mut(code) {
            space.status = status;
        }
    }
}
