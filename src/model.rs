use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Amount in the currency's smallest unit (e.g. cents).
pub type Money = i64;

pub type SpaceCode = String;

/// Opaque reference into the external client directory.
pub type ClientRef = String;

pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// License plate in normalized form: whitespace stripped, upper-cased.
/// Two plates are the same vehicle iff their normalized forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plate(String);

impl Plate {
    /// Returns `None` when nothing is left after normalization.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCategory {
    Car,
    Motorcycle,
    Truck,
}

impl VehicleCategory {
    pub const ALL: [VehicleCategory; 3] = [Self::Car, Self::Motorcycle, Self::Truck];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Truck => "truck",
        }
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(Self::Car),
            "motorcycle" | "moto" => Ok(Self::Motorcycle),
            "truck" => Ok(Self::Truck),
            other => Err(format!("unknown vehicle category: {other}")),
        }
    }
}

/// Occupancy status of a space. `Occupied` is entered and left only by
/// check-in/check-out; the other three are set by facility administration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceStatus {
    #[default]
    Available,
    Occupied,
    Reserved,
    OutOfService,
}

impl SpaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Reserved => "reserved",
            Self::OutOfService => "out_of_service",
        }
    }
}

impl fmt::Display for SpaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingSpace {
    pub code: SpaceCode,
    pub category: VehicleCategory,
    #[serde(default)]
    pub status: SpaceStatus,
}

impl ParkingSpace {
    pub fn new(code: impl Into<SpaceCode>, category: VehicleCategory) -> Self {
        Self {
            code: code.into(),
            category,
            status: SpaceStatus::Available,
        }
    }
}

/// Resolved vehicle as handed back by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub plate: Plate,
    pub category: VehicleCategory,
    pub client: Option<ClientRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingSession {
    pub id: Ulid,
    pub plate: Plate,
    /// Cached from the vehicle at check-in.
    pub category: VehicleCategory,
    pub space: SpaceCode,
    pub client: Option<ClientRef>,
    pub hourly_rate: Money,
    pub entry: Ms,
    pub exit: Option<Ms>,
    pub status: SessionStatus,
    /// Set iff `status == Closed`.
    pub fee: Option<Money>,
}

impl ParkingSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Time parked so far (or in total, once closed).
    pub fn elapsed_ms(&self, now: Ms) -> Ms {
        self.exit.unwrap_or(now) - self.entry
    }
}

/// Committed state changes, flat. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceAdded {
        code: SpaceCode,
        category: VehicleCategory,
        status: SpaceStatus,
    },
    SpaceStatusChanged {
        code: SpaceCode,
        status: SpaceStatus,
    },
    SpaceRemoved {
        code: SpaceCode,
    },
    CheckedIn {
        id: Ulid,
        plate: Plate,
        category: VehicleCategory,
        space: SpaceCode,
        client: Option<ClientRef>,
        hourly_rate: Money,
        entry: Ms,
    },
    CheckedOut {
        id: Ulid,
        space: SpaceCode,
        exit: Ms,
        fee: Money,
    },
    /// Mutations on the space stop until an operator lifts this.
    SpaceQuarantined {
        code: SpaceCode,
        reason: String,
    },
    QuarantineLifted {
        code: SpaceCode,
    },
}

impl Event {
    pub fn space(&self) -> &str {
        match self {
            Event::SpaceAdded { code, .. }
            | Event::SpaceStatusChanged { code, .. }
            | Event::SpaceRemoved { code }
            | Event::SpaceQuarantined { code, .. }
            | Event::QuarantineLifted { code } => code,
            Event::CheckedIn { space, .. } | Event::CheckedOut { space, .. } => space,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Point-in-time view for dashboard rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Ordered by code.
    pub spaces: Vec<ParkingSpace>,
    /// Ordered by entry time.
    pub active_sessions: Vec<ParkingSession>,
}

impl Snapshot {
    pub fn space(&self, code: &str) -> Option<&ParkingSpace> {
        self.spaces.iter().find(|s| s.code == code)
    }

    pub fn count(&self, status: SpaceStatus) -> usize {
        self.spaces.iter().filter(|s| s.status == status).count()
    }
}
