use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Which family a lock scope belongs to. Scopes are always taken vehicle
/// first, then space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Vehicle,
    Space,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Vehicle => "vehicle",
            Scope::Space => "space",
        }
    }
}

/// One async mutex per key, created on first use and dropped again once no
/// guard or waiter refers to it. A waiter parks on the mutex until it is
/// released or its deadline passes.
pub struct LockTable {
    scope: Scope,
    scopes: DashMap<String, Arc<Mutex<()>>>,
}

/// Deadline passed before the scope could be taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeout {
    pub scope: Scope,
    pub key: String,
}

/// A held scope. Dropping it releases the key and evicts the table entry if
/// nobody else is holding or waiting on it.
pub struct ScopeGuard<'a> {
    table: &'a LockTable,
    key: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.table.scope)
            .field("key", &self.key)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.table.evict_idle(&self.key);
    }
}

impl LockTable {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            scopes: DashMap::new(),
        }
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(m) = self.scopes.get(key) {
            return m.value().clone();
        }
        self.scopes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// The table's own reference is the only one left. Runs under the shard
    /// lock, so no `mutex()` call can clone the entry in between.
    fn evict_idle(&self, key: &str) {
        self.scopes.remove_if(key, |_, m| Arc::strong_count(m) == 1);
    }

    pub async fn acquire(&self, key: &str, deadline: Option<Instant>) -> Result<ScopeGuard<'_>, LockTimeout> {
        // Declared first so it drops last, after any pending lock future,
        // when this future is cancelled or times out.
        let mut guard = ScopeGuard {
            table: self,
            key: key.to_string(),
            held: None,
        };
        let waiting = self.mutex(key).lock_owned();
        let locked = match deadline {
            None => Ok(waiting.await),
            Some(deadline) => tokio::time::timeout_at(deadline, waiting).await,
        };
        match locked {
            Ok(held) => {
                guard.held = Some(held);
                Ok(guard)
            }
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL, "scope" => self.scope.as_str())
                    .increment(1);
                Err(LockTimeout {
                    scope: self.scope,
                    key: key.to_string(),
                })
            }
        }
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
