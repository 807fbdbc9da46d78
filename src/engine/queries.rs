use ulid::Ulid;

use crate::limits::DAY_MS;
use crate::model::*;
use crate::report::{Occupancy, Report};

use super::validate::{validate_plate, validate_timestamp, validate_window};
use super::{EngineError, OccupancyService};

impl OccupancyService {
    pub fn get_space(&self, code: &str) -> Result<ParkingSpace, EngineError> {
        Ok(self.spaces.get(code)?)
    }

    /// All spaces, ordered by code.
    pub fn list_spaces(&self) -> Vec<ParkingSpace> {
        self.spaces.list()
    }

    pub fn available_spaces(&self, category: VehicleCategory) -> Vec<ParkingSpace> {
        self.spaces.list_available(category)
    }

    pub fn get_session(&self, id: Ulid) -> Result<ParkingSession, EngineError> {
        self.sessions
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))
    }

    pub fn active_session_for_vehicle(&self, plate: &str) -> Result<Option<ParkingSession>, EngineError> {
        let plate = validate_plate(plate)?;
        Ok(self.sessions.active_by_vehicle(&plate))
    }

    pub fn active_count(&self) -> usize {
        self.sessions.active_count()
    }

    pub fn active_session_for_space(&self, code: &str) -> Option<ParkingSession> {
        self.sessions.active_by_space(code)
    }

    /// Every space and every active session as of one instant. Waits for
    /// in-flight commits so a space is never seen occupied without its
    /// session, or the reverse.
    pub async fn snapshot(&self) -> Snapshot {
        let _gate = self.commit_gate.write().await;
        Snapshot {
            spaces: self.spaces.list(),
            active_sessions: self.sessions.active(),
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        self.reports.occupancy(&self.spaces.list())
    }

    /// Closed sessions with entry in `[from, to)` plus current occupancy.
    pub async fn report(&self, from: Ms, to: Ms) -> Result<Report, EngineError> {
        let range = validate_window(from, to)?;
        let _gate = self.commit_gate.write().await;
        let closed = self.sessions.list_closed(range);
        Ok(self
            .reports
            .aggregate(range, closed.iter(), &self.spaces.list(), &self.sessions.active()))
    }

    /// Report over the 24 hours starting at `day_start`.
    pub async fn daily_report(&self, day_start: Ms) -> Result<Report, EngineError> {
        validate_timestamp(day_start, "day start")?;
        self.report(day_start, day_start + DAY_MS).await
    }

    /// Quarantined spaces with the reason each was taken out of use.
    pub fn quarantined(&self) -> Vec<(SpaceCode, String)> {
        let mut out: Vec<(SpaceCode, String)> = self
            .quarantine
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }

    /// Spaces whose status disagrees with the session store. Empty when
    /// occupied ⇔ one active session holds the space.
    pub async fn check_consistency(&self) -> Vec<String> {
        let _gate = self.commit_gate.write().await;
        let mut problems = Vec::new();
        for space in self.spaces.list() {
            let session = self.sessions.active_by_space(&space.code);
            match (space.status, session) {
                (SpaceStatus::Occupied, None) => {
                    problems.push(format!("space {} is occupied without an active session", space.code));
                }
                (status, Some(s)) if status != SpaceStatus::Occupied => {
                    problems.push(format!("space {} is {status} but holds session {}", space.code, s.id));
                }
                _ => {}
            }
        }
        for session in self.sessions.active() {
            if self.spaces.get(&session.space).is_err() {
                problems.push(format!("session {} holds unknown space {}", session.id, session.space));
            }
        }
        problems
    }
}
