use std::collections::BTreeSet;
use std::sync::RwLock;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(Ulid),
    #[error("vehicle {plate} already has active session {active}")]
    VehicleConflict { plate: Plate, active: Ulid },
    #[error("space {space} already has active session {active}")]
    SpaceConflict { space: SpaceCode, active: Ulid },
    #[error("session {0} is already closed")]
    AlreadyClosed(Ulid),
    #[error("session {id}: exit {exit} precedes entry {entry}")]
    ExitBeforeEntry { id: Ulid, entry: Ms, exit: Ms },
}

/// Owns every parking session, active and closed.
///
/// Two indexes enforce one active session per vehicle and per space; closed
/// sessions are additionally indexed by `(entry, id)` for range reports.
pub struct SessionStore {
    sessions: DashMap<Ulid, ParkingSession>,
    by_vehicle: DashMap<Plate, Ulid>,
    by_space: DashMap<SpaceCode, Ulid>,
    closed: RwLock<BTreeSet<(Ms, Ulid)>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_vehicle: DashMap::new(),
            by_space: DashMap::new(),
            closed: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.by_vehicle.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<ParkingSession> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn open_session(
        &self,
        vehicle: &Vehicle,
        space: &str,
        client: Option<ClientRef>,
        hourly_rate: Money,
        entry: Ms,
    ) -> Result<ParkingSession, SessionError> {
        let session = ParkingSession {
            id: Ulid::new(),
            plate: vehicle.plate.clone(),
            category: vehicle.category,
            space: space.to_string(),
            client,
            hourly_rate,
            entry,
            exit: None,
            status: SessionStatus::Active,
            fee: None,
        };
        self.insert_active(session.clone())?;
        Ok(session)
    }

    /// Insert an already-built active session, enforcing both uniqueness
    /// indexes. Used directly by journal replay.
    pub(crate) fn insert_active(&self, session: ParkingSession) -> Result<(), SessionError> {
        // Vehicle index first, then space index: one fixed order for all writers.
        let vehicle_slot = match self.by_vehicle.entry(session.plate.clone()) {
            Entry::Occupied(e) => {
                return Err(SessionError::VehicleConflict {
                    plate: session.plate,
                    active: *e.get(),
                });
            }
            Entry::Vacant(v) => v,
        };
        let space_slot = match self.by_space.entry(session.space.clone()) {
            Entry::Occupied(e) => {
                return Err(SessionError::SpaceConflict {
                    space: session.space,
                    active: *e.get(),
                });
            }
            Entry::Vacant(v) => v,
        };
        let id = session.id;
        self.sessions.insert(id, session);
        vehicle_slot.insert(id);
        space_slot.insert(id);
        Ok(())
    }

    pub fn close_session(&self, id: Ulid, exit: Ms, fee: Money) -> Result<ParkingSession, SessionError> {
        let mut session = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if session.status == SessionStatus::Closed {
            return Err(SessionError::AlreadyClosed(id));
        }
        if exit < session.entry {
            return Err(SessionError::ExitBeforeEntry {
                id,
                entry: session.entry,
                exit,
            });
        }
        session.status = SessionStatus::Closed;
        session.exit = Some(exit);
        session.fee = Some(fee);
        let closed = session.clone();
        drop(session);

        self.by_vehicle.remove_if(&closed.plate, |_, active| *active == id);
        self.by_space.remove_if(&closed.space, |_, active| *active == id);
        self.closed_index_mut().insert((closed.entry, id));
        Ok(closed)
    }

    pub fn active_by_vehicle(&self, plate: &Plate) -> Option<ParkingSession> {
        let id = *self.by_vehicle.get(plate)?;
        self.get(&id)
    }

    pub fn active_by_space(&self, space: &str) -> Option<ParkingSession> {
        let id = *self.by_space.get(space)?;
        self.get(&id)
    }

    /// Active sessions ordered by entry time.
    pub fn active(&self) -> Vec<ParkingSession> {
        let mut active: Vec<ParkingSession> = self
            .sessions
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.value().clone())
            .collect();
        active.sort_by_key(|s| (s.entry, s.id));
        active
    }

    /// Closed sessions whose entry falls in `range`, ordered by entry.
    /// The result can be iterated any number of times; each pass reads the
    /// current store.
    pub fn list_closed(&self, range: Span) -> ClosedSessions<'_> {
        ClosedSessions { store: self, range }
    }

    /// Undo an `open_session` whose surrounding check-in failed.
    pub(crate) fn discard_open(&self, id: Ulid) {
        if let Some((_, session)) = self.sessions.remove_if(&id, |_, s| s.is_active()) {
            self.by_vehicle.remove_if(&session.plate, |_, active| *active == id);
            self.by_space.remove_if(&session.space, |_, active| *active == id);
        }
    }

    /// Undo a `close_session` whose surrounding check-out failed.
    pub(crate) fn revert_close(&self, id: Ulid) {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.status != SessionStatus::Closed {
            return;
        }
        session.status = SessionStatus::Active;
        session.exit = None;
        session.fee = None;
        let (plate, space, entry) = (session.plate.clone(), session.space.clone(), session.entry);
        drop(session);

        self.closed_index_mut().remove(&(entry, id));
        self.by_vehicle.insert(plate, id);
        self.by_space.insert(space, id);
    }

    fn closed_ids(&self, range: Span) -> Vec<Ulid> {
        let index = self.closed.read().unwrap_or_else(|e| e.into_inner());
        index
            .range((range.start, Ulid::nil())..(range.end, Ulid::nil()))
            .map(|(_, id)| *id)
            .collect()
    }

    fn closed_index_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<(Ms, Ulid)>> {
        self.closed.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Restartable view over closed sessions in an entry-time range.
pub struct ClosedSessions<'a> {
    store: &'a SessionStore,
    range: Span,
}

impl<'a> ClosedSessions<'a> {
    pub fn range(&self) -> Span {
        self.range
    }

    /// Sessions are fetched one at a time as the iterator advances.
    pub fn iter(&self) -> impl Iterator<Item = ParkingSession> + use<'a> {
        let store = self.store;
        store
            .closed_ids(self.range)
            .into_iter()
            .filter_map(move |id| store.get(&id))
    }
}

impl<'a> IntoIterator for &ClosedSessions<'a> {
    type Item = ParkingSession;
    type IntoIter = Box<dyn Iterator<Item = ParkingSession> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Ms = 1_700_000_000_000;

    fn vehicle(plate: &str) -> Vehicle {
        Vehicle {
            plate: Plate::parse(plate).unwrap(),
            category: VehicleCategory::Car,
            client: None,
        }
    }

    #[test]
    fn open_creates_active_session() {
        let store = SessionStore::new();
        let s = store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        assert!(s.is_active());
        assert_eq!(s.exit, None);
        assert_eq!(s.fee, None);
        assert_eq!(store.active_by_space("A-01").unwrap().id, s.id);
        assert_eq!(store.active_by_vehicle(&s.plate).unwrap().id, s.id);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn second_session_for_vehicle_conflicts() {
        let store = SessionStore::new();
        let first = store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        let r = store.open_session(&vehicle("aaa 111"), "A-02", None, 5000, T0);
        assert_eq!(
            r,
            Err(SessionError::VehicleConflict {
                plate: first.plate.clone(),
                active: first.id
            })
        );
        // The failed attempt leaves no trace on A-02
        assert!(store.active_by_space("A-02").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn second_session_for_space_conflicts() {
        let store = SessionStore::new();
        store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        let r = store.open_session(&vehicle("BBB222"), "A-01", None, 5000, T0);
        assert!(matches!(r, Err(SessionError::SpaceConflict { .. })));
        // Vehicle index must not keep the rejected vehicle
        assert!(store.active_by_vehicle(&Plate::parse("BBB222").unwrap()).is_none());
    }

    #[test]
    fn close_sets_exit_and_fee_once() {
        let store = SessionStore::new();
        let s = store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        let closed = store.close_session(s.id, T0 + 1000, 5000).unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert_eq!(closed.exit, Some(T0 + 1000));
        assert_eq!(closed.fee, Some(5000));
        assert!(store.active_by_space("A-01").is_none());
        assert_eq!(store.active_count(), 0);

        assert_eq!(
            store.close_session(s.id, T0 + 2000, 1),
            Err(SessionError::AlreadyClosed(s.id))
        );
        assert_eq!(store.get(&s.id).unwrap().fee, Some(5000));
    }

    #[test]
    fn close_unknown_and_backwards_exit() {
        let store = SessionStore::new();
        let unknown = Ulid::new();
        assert_eq!(store.close_session(unknown, T0, 0), Err(SessionError::NotFound(unknown)));

        let s = store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        assert!(matches!(
            store.close_session(s.id, T0 - 1, 0),
            Err(SessionError::ExitBeforeEntry { .. })
        ));
        assert!(store.get(&s.id).unwrap().is_active());
    }

    #[test]
    fn list_closed_half_open_and_ordered() {
        let store = SessionStore::new();
        let mut ids = Vec::new();
        for (i, entry) in [T0 + 300, T0 + 100, T0 + 200, T0 + 400].iter().enumerate() {
            let s = store
                .open_session(&vehicle(&format!("CAR{i}")), &format!("A-0{i}"), None, 100, *entry)
                .unwrap();
            store.close_session(s.id, entry + 50, 100).unwrap();
            ids.push((*entry, s.id));
        }
        // An active session inside the window is not listed
        store.open_session(&vehicle("LIVE1"), "B-01", None, 100, T0 + 150).unwrap();

        let closed = store.list_closed(Span::new(T0 + 100, T0 + 400));
        let entries: Vec<Ms> = closed.iter().map(|s| s.entry).collect();
        assert_eq!(entries, vec![T0 + 100, T0 + 200, T0 + 300]);

        // Restartable: a second pass yields the same sequence
        let again: Vec<Ms> = (&closed).into_iter().map(|s| s.entry).collect();
        assert_eq!(again, entries);
    }

    #[test]
    fn discard_open_removes_all_traces() {
        let store = SessionStore::new();
        let s = store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        store.discard_open(s.id);
        assert!(store.get(&s.id).is_none());
        assert!(store.active_by_space("A-01").is_none());
        assert!(store.active_by_vehicle(&s.plate).is_none());
    }

    #[test]
    fn revert_close_restores_active() {
        let store = SessionStore::new();
        let s = store.open_session(&vehicle("AAA111"), "A-01", None, 5000, T0).unwrap();
        store.close_session(s.id, T0 + 10, 5000).unwrap();
        store.revert_close(s.id);

        let restored = store.get(&s.id).unwrap();
        assert!(restored.is_active());
        assert_eq!(restored.fee, None);
        assert_eq!(store.active_by_space("A-01").unwrap().id, s.id);
        assert_eq!(store.list_closed(Span::new(T0, T0 + 1)).iter().count(), 0);
    }
}
