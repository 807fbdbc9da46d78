//! Read-only summaries derived from the session store and space registry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::model::*;

/// Which spaces count toward the occupancy percentage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyDenominator {
    /// Every registered space, out-of-service ones included.
    #[default]
    AllSpaces,
    /// Out-of-service spaces are left out.
    InService,
}

impl FromStr for OccupancyDenominator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "all_spaces" => Ok(Self::AllSpaces),
            "in_service" => Ok(Self::InService),
            other => Err(format!("unknown occupancy denominator: {other}")),
        }
    }
}

impl fmt::Display for OccupancyDenominator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSpaces => f.write_str("all"),
            Self::InService => f.write_str("in_service"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occupancy {
    pub total: usize,
    pub available: usize,
    pub occupied: usize,
    pub reserved: usize,
    pub out_of_service: usize,
    pub denominator: usize,
    /// `occupied / denominator`, 0 when the denominator is 0.
    pub ratio: f64,
    /// `ratio` as a whole percentage, rounded half up.
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryShare {
    pub category: VehicleCategory,
    pub count: usize,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub range: Span,
    pub closed_sessions: usize,
    pub revenue: Money,
    pub closed_by_category: BTreeMap<VehicleCategory, usize>,
    pub occupancy: Occupancy,
    /// One entry per category, in category order, including zero counts.
    pub active_by_category: Vec<CategoryShare>,
}

fn rounded_percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part * 100 + whole / 2) / whole) as u32
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReportAggregator {
    policy: OccupancyDenominator,
}

impl ReportAggregator {
    pub fn new(policy: OccupancyDenominator) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> OccupancyDenominator {
        self.policy
    }

    pub fn occupancy(&self, spaces: &[ParkingSpace]) -> Occupancy {
        let count = |status: SpaceStatus| spaces.iter().filter(|s| s.status == status).count();
        let total = spaces.len();
        let occupied = count(SpaceStatus::Occupied);
        let out_of_service = count(SpaceStatus::OutOfService);
        let denominator = match self.policy {
            OccupancyDenominator::AllSpaces => total,
            OccupancyDenominator::InService => total - out_of_service,
        };
        Occupancy {
            total,
            available: count(SpaceStatus::Available),
            occupied,
            reserved: count(SpaceStatus::Reserved),
            out_of_service,
            denominator,
            ratio: if denominator == 0 {
                0.0
            } else {
                occupied as f64 / denominator as f64
            },
            percent: rounded_percent(occupied, denominator),
        }
    }

    pub fn active_by_category(&self, active: &[ParkingSession]) -> Vec<CategoryShare> {
        VehicleCategory::ALL
            .iter()
            .map(|&category| {
                let count = active.iter().filter(|s| s.category == category).count();
                CategoryShare {
                    category,
                    count,
                    percent: rounded_percent(count, active.len()),
                }
            })
            .collect()
    }

    /// `closed` must already be restricted to `range`; it is consumed once.
    pub fn aggregate<I>(
        &self,
        range: Span,
        closed: I,
        spaces: &[ParkingSpace],
        active: &[ParkingSession],
    ) -> Report
    where
        I: IntoIterator<Item = ParkingSession>,
    {
        let mut closed_sessions = 0;
        let mut revenue: Money = 0;
        let mut closed_by_category = BTreeMap::new();
        for session in closed {
            closed_sessions += 1;
            revenue = revenue.saturating_add(session.fee.unwrap_or(0));
            *closed_by_category.entry(session.category).or_insert(0) += 1;
        }
        Report {
            range,
            closed_sessions,
            revenue,
            closed_by_category,
            occupancy: self.occupancy(spaces),
            active_by_category: self.active_by_category(active),
        }
    }
}
