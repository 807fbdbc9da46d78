use std::time::Duration;

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::billing;
use crate::directory::DirectoryError;
use crate::limits::MAX_SPACES;
use crate::model::*;
use crate::observability::{CHECK_INS_TOTAL, CHECK_OUTS_TOTAL, OPERATION_DURATION_SECONDS, REVENUE_TOTAL};

use super::sessions::SessionError;
use super::validate::*;
use super::{EngineError, OccupancyService};

/// A vehicle arriving at the gate.
#[derive(Debug, Clone)]
pub struct CheckInRequest {
    pub plate: String,
    pub category: VehicleCategory,
    pub client: Option<ClientRef>,
    /// Explicit space; `None` lets the service pick the first free one by code.
    pub space: Option<SpaceCode>,
    pub hourly_rate: Money,
    pub timeout: Option<Duration>,
}

impl CheckInRequest {
    pub fn new(plate: impl Into<String>, category: VehicleCategory, hourly_rate: Money) -> Self {
        Self {
            plate: plate.into(),
            category,
            client: None,
            space: None,
            hourly_rate,
            timeout: None,
        }
    }

    pub fn client(mut self, client: impl Into<ClientRef>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn space(mut self, code: impl Into<SpaceCode>) -> Self {
        self.space = Some(code.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn record(counter: &'static str, op: &'static str, started: std::time::Instant, status: &'static str) {
    metrics::counter!(counter, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}

impl OccupancyService {
    pub async fn check_in(&self, req: CheckInRequest) -> Result<ParkingSession, EngineError> {
        let started = std::time::Instant::now();
        let result = self.check_in_inner(req).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        record(CHECK_INS_TOTAL, "check_in", started, status);
        result
    }

    async fn check_in_inner(&self, req: CheckInRequest) -> Result<ParkingSession, EngineError> {
        let plate = validate_plate(&req.plate)?;
        validate_client(req.client.as_ref())?;
        validate_rate(req.hourly_rate)?;
        if let Some(code) = &req.space {
            validate_space_code(code)?;
        }

        // Directory I/O happens before any scope is held.
        let vehicle = self
            .directory
            .resolve(&plate, req.category, req.client.as_ref())
            .await
            .map_err(|e| match e {
                DirectoryError::Rejected(msg) => EngineError::InvalidInput(msg),
                DirectoryError::Unavailable(msg) => EngineError::Directory(msg),
            })?;
        let client = req.client.or_else(|| vehicle.client.clone());

        let deadline = self.deadline(req.timeout);
        let _vehicle_scope = self.vehicle_locks.acquire(vehicle.plate.as_str(), deadline).await?;
        if let Some(active) = self.sessions.active_by_vehicle(&vehicle.plate) {
            return Err(EngineError::VehicleAlreadyParked {
                plate: vehicle.plate,
                session: active.id,
            });
        }

        if let Some(code) = req.space {
            let space = self
                .spaces
                .get(&code)
                .map_err(|_| EngineError::InvalidInput(format!("unknown space {code}")))?;
            if space.category != vehicle.category {
                return Err(EngineError::InvalidInput(format!(
                    "space {code} is for {}, vehicle is {}",
                    space.category, vehicle.category
                )));
            }
            let _space_scope = self.space_locks.acquire(&code, deadline).await?;
            return self.occupy(&vehicle, &code, client, req.hourly_rate).await;
        }

        for candidate in self.spaces.list_available(vehicle.category) {
            if self.quarantine.contains_key(&candidate.code) {
                continue;
            }
            let _space_scope = self.space_locks.acquire(&candidate.code, deadline).await?;
            match self.occupy(&vehicle, &candidate.code, client.clone(), req.hourly_rate).await {
                Err(EngineError::SpaceConflict(code)) => {
                    debug!("space {code} taken concurrently, trying next");
                }
                other => return other,
            }
        }
        Err(EngineError::NoSpaceAvailable(vehicle.category))
    }

    /// Occupy `code` and open the session. Caller holds the vehicle and
    /// space scopes.
    async fn occupy(
        &self,
        vehicle: &Vehicle,
        code: &str,
        client: Option<ClientRef>,
        hourly_rate: Money,
    ) -> Result<ParkingSession, EngineError> {
        self.ensure_not_quarantined(code)?;
        let _gate = self.commit_gate.read().await;

        self.spaces
            .mark_occupied(code)
            .map_err(|_| EngineError::SpaceConflict(code.to_string()))?;

        let entry = self.clock.now();
        let session = match self.sessions.open_session(vehicle, code, client, hourly_rate, entry) {
            Ok(session) => session,
            Err(e) => {
                self.undo_occupied(code);
                return Err(match e {
                    SessionError::VehicleConflict { plate, active } => EngineError::VehicleAlreadyParked {
                        plate,
                        session: active,
                    },
                    other => {
                        self.quarantine_space(code, format!("space was available but {other}"))
                            .await
                    }
                });
            }
        };

        let event = Event::CheckedIn {
            id: session.id,
            plate: session.plate.clone(),
            category: session.category,
            space: session.space.clone(),
            client: session.client.clone(),
            hourly_rate,
            entry,
        };
        if let Err(e) = self.journal_append(&event).await {
            error!("check-in of {} on {code} not journaled, rolling back: {e}", session.plate);
            self.sessions.discard_open(session.id);
            self.undo_occupied(code);
            return Err(e);
        }

        self.notify.send(&event);
        info!("checked in {} ({}) on {code}, session {}", session.plate, session.category, session.id);
        Ok(session)
    }

    fn undo_occupied(&self, code: &str) {
        if let Err(e) = self.spaces.mark_available(code) {
            warn!("rollback of space {code} failed: {e}");
        }
    }

    pub async fn check_out(
        &self,
        id: Ulid,
        exit: Ms,
        timeout: Option<Duration>,
    ) -> Result<ParkingSession, EngineError> {
        let started = std::time::Instant::now();
        let result = self.check_out_inner(id, exit, timeout).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        record(CHECK_OUTS_TOTAL, "check_out", started, status);
        result
    }

    async fn check_out_inner(
        &self,
        id: Ulid,
        exit: Ms,
        timeout: Option<Duration>,
    ) -> Result<ParkingSession, EngineError> {
        validate_timestamp(exit, "exit")?;
        let session = self.active_session(id)?;

        let deadline = self.deadline(timeout);
        let _vehicle_scope = self.vehicle_locks.acquire(session.plate.as_str(), deadline).await?;
        let _space_scope = self.space_locks.acquire(&session.space, deadline).await?;
        // Another check-out may have won while we waited.
        let session = self.active_session(id)?;
        self.ensure_not_quarantined(&session.space)?;

        let fee = billing::compute_fee(session.entry, exit, session.hourly_rate)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let _gate = self.commit_gate.read().await;
        let closed = self.sessions.close_session(id, exit, fee).map_err(|e| match e {
            SessionError::AlreadyClosed(id) => EngineError::AlreadyClosed(id),
            SessionError::NotFound(id) => EngineError::NotFound(format!("session {id}")),
            other => EngineError::InvalidInput(other.to_string()),
        })?;

        if let Err(e) = self.spaces.mark_available(&closed.space) {
            self.sessions.revert_close(id);
            let reason = format!("session {id} was active but {e}");
            return Err(self.quarantine_space(&closed.space, reason).await);
        }

        let event = Event::CheckedOut {
            id,
            space: closed.space.clone(),
            exit,
            fee,
        };
        if let Err(e) = self.journal_append(&event).await {
            error!("check-out of session {id} not journaled, rolling back: {e}");
            self.sessions.revert_close(id);
            if let Err(e) = self.spaces.mark_occupied(&closed.space) {
                warn!("rollback of space {} failed: {e}", closed.space);
            }
            return Err(e);
        }

        metrics::counter!(REVENUE_TOTAL).increment(fee.max(0) as u64);
        self.notify.send(&event);
        info!("checked out {} from {}, fee {fee}", closed.plate, closed.space);
        Ok(closed)
    }

    fn active_session(&self, id: Ulid) -> Result<ParkingSession, EngineError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?;
        if !session.is_active() {
            return Err(EngineError::AlreadyClosed(id));
        }
        Ok(session)
    }

    // ── Space administration ─────────────────────────────

    pub async fn add_space(&self, space: ParkingSpace) -> Result<(), EngineError> {
        validate_space_code(&space.code)?;
        if space.status == SpaceStatus::Occupied {
            return Err(EngineError::InvalidInput("a new space cannot start occupied".into()));
        }
        if self.spaces.len() >= MAX_SPACES {
            return Err(EngineError::InvalidInput("too many spaces".into()));
        }

        let _space_scope = self.space_locks.acquire(&space.code, self.deadline(None)).await?;
        let _gate = self.commit_gate.read().await;
        self.spaces.insert(space.clone())?;

        let event = Event::SpaceAdded {
            code: space.code.clone(),
            category: space.category,
            status: space.status,
        };
        if let Err(e) = self.journal_append(&event).await {
            let _ = self.spaces.remove(&space.code);
            return Err(e);
        }
        self.notify.send(&event);
        info!("added space {} ({}, {})", space.code, space.category, space.status);
        Ok(())
    }

    /// Move a space among available, reserved and out-of-service.
    pub async fn set_space_status(&self, code: &str, status: SpaceStatus) -> Result<ParkingSpace, EngineError> {
        let _space_scope = self.space_locks.acquire(code, self.deadline(None)).await?;
        self.ensure_not_quarantined(code)?;
        let _gate = self.commit_gate.read().await;
        let previous = self.spaces.set_status(code, status)?;

        let event = Event::SpaceStatusChanged {
            code: code.to_string(),
            status,
        };
        if let Err(e) = self.journal_append(&event).await {
            self.spaces.force_status(code, previous);
            return Err(e);
        }
        self.notify.send(&event);
        info!("space {code}: {previous} -> {status}");
        Ok(self.spaces.get(code)?)
    }

    pub async fn remove_space(&self, code: &str) -> Result<ParkingSpace, EngineError> {
        let _space_scope = self.space_locks.acquire(code, self.deadline(None)).await?;
        self.ensure_not_quarantined(code)?;
        if let Some(active) = self.sessions.active_by_space(code) {
            return Err(EngineError::InvalidState(format!(
                "space {code} holds active session {}",
                active.id
            )));
        }
        let _gate = self.commit_gate.read().await;
        let removed = self.spaces.remove(code)?;

        let event = Event::SpaceRemoved { code: code.to_string() };
        if let Err(e) = self.journal_append(&event).await {
            let _ = self.spaces.insert(removed);
            return Err(e);
        }
        self.notify.send(&event);
        self.notify.remove(code);
        info!("removed space {code}");
        Ok(removed)
    }

    /// Lift a quarantine after an operator has looked at the space. The
    /// status is re-derived from the session store: occupied iff an active
    /// session holds it.
    pub async fn release_quarantine(&self, code: &str) -> Result<ParkingSpace, EngineError> {
        let _space_scope = self.space_locks.acquire(code, self.deadline(None)).await?;
        if !self.quarantine.contains_key(code) {
            return Err(EngineError::NotFound(format!("space {code} is not quarantined")));
        }
        let current = self.spaces.get(code)?.status;
        let reconciled = match self.sessions.active_by_space(code) {
            Some(_) => SpaceStatus::Occupied,
            None if current == SpaceStatus::Occupied => SpaceStatus::Available,
            None => current,
        };

        let _gate = self.commit_gate.read().await;
        if reconciled != current {
            self.spaces.force_status(code, reconciled);
            let event = Event::SpaceStatusChanged {
                code: code.to_string(),
                status: reconciled,
            };
            if let Err(e) = self.journal_append(&event).await {
                self.spaces.force_status(code, current);
                return Err(e);
            }
            self.notify.send(&event);
        }

        // A failure here leaves the reconciled status in place and the space
        // still quarantined; releasing again is safe.
        let lifted = Event::QuarantineLifted { code: code.to_string() };
        self.journal_append(&lifted).await?;
        self.quarantine.remove(code);
        self.notify.send(&lifted);
        warn!("released quarantine on space {code}: {current} -> {reconciled}");
        Ok(self.spaces.get(code)?)
    }
}
