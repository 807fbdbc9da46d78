mod error;
mod locks;
mod mutations;
mod queries;
mod registry;
mod sessions;
mod validate;

pub use error::{EngineError, ErrorKind};
pub use locks::{LockTable, LockTimeout, Scope, ScopeGuard};
pub use mutations::CheckInRequest;
pub use registry::{RegistryError, SpaceRegistry};
pub use sessions::{ClosedSessions, SessionError, SessionStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::clock::Clock;
use crate::directory::VehicleDirectory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::report::{OccupancyDenominator, ReportAggregator};
use crate::journal::Journal;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// flush and fsync once for the whole batch.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let JournalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut journal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut journal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut journal, other);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| journal.stage(event));
    // Flush even after a failed append so partial bytes don't leak into the
    // next batch; every caller in this batch is told it failed.
    let flushed = journal.commit();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compacted(journal.path(), &events).and_then(|()| journal.install_compacted());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => commit_batch(journal, &mut vec![(event, response)]),
    }
}

fn checked_in_event(s: &ParkingSession) -> Event {
    Event::CheckedIn {
        id: s.id,
        plate: s.plate.clone(),
        category: s.category,
        space: s.space.clone(),
        client: s.client.clone(),
        hourly_rate: s.hourly_rate,
        entry: s.entry,
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default bound on lock waits when a request carries no timeout.
    /// `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
    pub occupancy_denominator: OccupancyDenominator,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Duration::from_secs(5)),
            occupancy_denominator: OccupancyDenominator::AllSpaces,
        }
    }
}

/// Orchestrates check-in, check-out and space administration over the
/// space registry and session store. Every state change goes through here.
pub struct OccupancyService {
    pub(super) spaces: SpaceRegistry,
    pub(super) sessions: SessionStore,
    pub(super) directory: Arc<dyn VehicleDirectory>,
    pub(super) clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    pub(super) journal: Option<mpsc::Sender<JournalCommand>>,
    pub(super) vehicle_locks: LockTable,
    pub(super) space_locks: LockTable,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// state it snapshots and the journal it replaces agree.
    pub(super) commit_gate: RwLock<()>,
    /// Spaces whose occupancy invariant was found broken, with the reason.
    pub(super) quarantine: DashMap<SpaceCode, String>,
    pub(super) reports: ReportAggregator,
    pub(super) config: EngineConfig,
}

impl OccupancyService {
    /// Purely in-memory service; nothing survives the process.
    pub fn new(
        directory: Arc<dyn VehicleDirectory>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> Self {
        Self {
            spaces: SpaceRegistry::new(),
            sessions: SessionStore::new(),
            directory,
            clock,
            notify,
            journal: None,
            vehicle_locks: LockTable::new(Scope::Vehicle),
            space_locks: LockTable::new(Scope::Space),
            commit_gate: RwLock::new(()),
            quarantine: DashMap::new(),
            reports: ReportAggregator::new(config.occupancy_denominator),
            config,
        }
    }

    /// Journal-backed service: replays `journal_path` and spawns the
    /// group-commit writer. Must be called inside a tokio runtime.
    pub fn open(
        journal_path: PathBuf,
        directory: Arc<dyn VehicleDirectory>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let (journal, recovery) = Journal::open(&journal_path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, rx));

        let mut service = Self::new(directory, clock, notify, config);
        service.journal = Some(tx);
        for event in &recovery.events {
            service.replay(event);
        }
        tracing::info!(
            "replayed {} journal events: {} spaces, {} sessions, {} quarantined",
            recovery.events.len(),
            service.spaces.len(),
            service.sessions.len(),
            service.quarantine.len()
        );
        Ok(service)
    }

    /// Apply a committed event without validation beyond the stores' own.
    fn replay(&self, event: &Event) {
        let outcome = match event {
            Event::SpaceAdded { code, category, status } => self
                .spaces
                .insert(ParkingSpace {
                    code: code.clone(),
                    category: *category,
                    status: *status,
                })
                .map_err(|e| e.to_string()),
            Event::SpaceStatusChanged { code, status } => {
                self.spaces.force_status(code, *status);
                Ok(())
            }
            Event::SpaceRemoved { code } => self.spaces.remove(code).map(|_| ()).map_err(|e| e.to_string()),
            Event::CheckedIn {
                id,
                plate,
                category,
                space,
                client,
                hourly_rate,
                entry,
            } => {
                let session = ParkingSession {
                    id: *id,
                    plate: plate.clone(),
                    category: *category,
                    space: space.clone(),
                    client: client.clone(),
                    hourly_rate: *hourly_rate,
                    entry: *entry,
                    exit: None,
                    status: SessionStatus::Active,
                    fee: None,
                };
                self.spaces.force_status(space, SpaceStatus::Occupied);
                self.sessions.insert_active(session).map_err(|e| e.to_string())
            }
            Event::CheckedOut { id, space, exit, fee } => {
                self.spaces.force_status(space, SpaceStatus::Available);
                self.sessions.close_session(*id, *exit, *fee).map(|_| ()).map_err(|e| e.to_string())
            }
            Event::SpaceQuarantined { code, reason } => {
                self.quarantine.insert(code.clone(), reason.clone());
                Ok(())
            }
            Event::QuarantineLifted { code } => {
                self.quarantine.remove(code);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!("journal replay skipped {event:?}: {e}");
        }
    }

    /// Send an event to the group-commit writer and wait for its fsync.
    /// In-memory services commit immediately.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        journal
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))
    }

    pub(super) fn deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        timeout
            .or(self.config.lock_timeout)
            .map(|t| Instant::now() + t)
    }

    pub(super) fn ensure_not_quarantined(&self, code: &str) -> Result<(), EngineError> {
        match self.quarantine.get(code) {
            Some(reason) => Err(EngineError::InternalInvariantViolation(format!(
                "space {code} is quarantined: {}",
                reason.value()
            ))),
            None => Ok(()),
        }
    }

    /// Record a broken invariant on `code` and stop mutating it until an
    /// operator releases it. The quarantine is journaled so it outlives a
    /// restart; if that write fails it still holds in memory.
    pub(super) async fn quarantine_space(&self, code: &str, reason: String) -> EngineError {
        error!("invariant violation on space {code}: {reason}");
        metrics::counter!(crate::observability::INVARIANT_VIOLATIONS_TOTAL).increment(1);
        self.quarantine.insert(code.to_string(), reason.clone());

        let event = Event::SpaceQuarantined {
            code: code.to_string(),
            reason: reason.clone(),
        };
        match self.journal_append(&event).await {
            Ok(()) => self.notify.send(&event),
            Err(e) => error!("quarantine of space {code} not journaled: {e}"),
        }
        EngineError::InternalInvariantViolation(reason)
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let Some(journal) = &self.journal else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if journal
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal as a short event list reproducing the current
    /// state. No-op for in-memory services.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;

        let spaces = self.spaces.list();
        let mut events: Vec<Event> = spaces
            .iter()
            .map(|s| Event::SpaceAdded {
                code: s.code.clone(),
                category: s.category,
                status: s.status,
            })
            .collect();

        // Closed sessions as adjacent in/out pairs, then the active ones, so
        // no replayed check-in meets a space still held by an earlier one.
        for s in self.sessions.list_closed(Span::new(Ms::MIN, Ms::MAX)).iter() {
            let (Some(exit), Some(fee)) = (s.exit, s.fee) else {
                continue;
            };
            events.push(checked_in_event(&s));
            events.push(Event::CheckedOut {
                id: s.id,
                space: s.space,
                exit,
                fee,
            });
        }
        events.extend(self.sessions.active().iter().map(checked_in_event));

        // Session events move statuses; restate the final ones.
        events.extend(spaces.into_iter().map(|s| Event::SpaceStatusChanged {
            code: s.code,
            status: s.status,
        }));
        events.extend(
            self.quarantined()
                .into_iter()
                .map(|(code, reason)| Event::SpaceQuarantined { code, reason }),
        );

        let (tx, rx) = oneshot::channel();
        journal
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))
    }
}
