//! Session registry.
//!
//! Lifecycle: issued by `get_session_id` → validated on every call →
//! invalidated by `close_session`, `retarget` or `invalidate_all`.
//!
//! Each session sits behind its own mutex. The registry map is only held
//! long enough to clone the session handle, so storage I/O done under a
//! session lock never blocks other sessions.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tablet_common::error::{TabletError, TabletResult};
use tablet_common::types::{SessionId, Target, TransactionId};
use tablet_protocol::types::SessionInfo;

use crate::engine::EngineTransaction;

/// The storage transaction currently open on a session.
pub struct OpenTransaction {
    pub id: TransactionId,
    pub started_at: Instant,
    pub handle: Box<dyn EngineTransaction>,
}

impl fmt::Debug for OpenTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenTransaction")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// A single client session.
#[derive(Debug)]
pub struct SessionState {
    pub id: SessionId,
    pub target: Target,
    pub created_at: Instant,
    pub last_active: Instant,
    pub request_count: u64,
    /// Cleared when the session is invalidated; a handle cloned before the
    /// invalidation observes this after taking the lock.
    pub live: bool,
    pub txn: Option<OpenTransaction>,
}

impl SessionState {
    fn new(id: SessionId, target: Target) -> Self {
        let now = Instant::now();
        Self {
            id,
            target,
            created_at: now,
            last_active: now,
            request_count: 0,
            live: true,
            txn: None,
        }
    }

    fn on_request(&mut self) {
        self.request_count += 1;
        self.last_active = Instant::now();
    }

    /// Roll back and drop any open transaction, logging engine failures.
    fn abandon_transaction(&mut self) -> Option<TransactionId> {
        let txn = self.txn.take()?;
        if let Err(e) = txn.handle.rollback() {
            tracing::warn!(session = %self.id, txn = %txn.id, "rollback on invalidation failed: {}", e);
        }
        Some(txn.id)
    }
}

pub type SessionHandle = Arc<Mutex<SessionState>>;

/// Thread-safe session registry.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    target: RwLock<Target>,
    next_id: AtomicI64,
    /// Issued and not yet closed. Slots are reserved here before insert so
    /// the cap holds under concurrent issue.
    reserved: AtomicUsize,
    max_sessions: usize,
}

impl SessionRegistry {
    /// `max_sessions == 0` means unlimited.
    pub fn new(target: Target, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            target: RwLock::new(target),
            next_id: AtomicI64::new(1),
            reserved: AtomicUsize::new(0),
            max_sessions,
        }
    }

    pub fn target(&self) -> Target {
        self.target.read().clone()
    }

    /// Issue a session for `(keyspace, shard)`, which must be what this
    /// tablet currently serves.
    pub fn get_session_id(&self, keyspace: &str, shard: &str) -> TabletResult<SessionInfo> {
        let target = self.target();
        if !target.matches(keyspace, shard) {
            return Err(TabletError::WrongShard {
                requested: Target::new(keyspace, shard),
                serving: target,
            });
        }
        let max = self.max_sessions;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .map_err(|n| {
                TabletError::ResourceExhausted(format!("{} live sessions (max {})", n, max))
            })?;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions
            .insert(id, Arc::new(Mutex::new(SessionState::new(id, target))));
        tablet_observability::record_live_sessions(self.sessions.len());
        tracing::debug!(session = %id, "session issued");
        Ok(SessionInfo { session_id: id })
    }

    pub(crate) fn handle(&self, id: SessionId) -> TabletResult<SessionHandle> {
        self.sessions
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(TabletError::InvalidSession(id))
    }

    /// Run `f` under the session's lock. Fails with `InvalidSession` if the
    /// id was never issued or has been invalidated.
    pub fn with_session<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut SessionState) -> TabletResult<R>,
    ) -> TabletResult<R> {
        let handle = self.handle(id)?;
        let mut state = handle.lock();
        if !state.live {
            return Err(TabletError::InvalidSession(id));
        }
        state.on_request();
        f(&mut *state)
    }

    /// Check that `id` names a live session.
    pub fn validate(&self, id: SessionId) -> TabletResult<()> {
        self.with_session(id, |_| Ok(()))
    }

    /// Invalidate one session, rolling back its open transaction.
    pub fn close_session(&self, id: SessionId) -> TabletResult<()> {
        let (_, handle) = self
            .sessions
            .remove(&id)
            .ok_or(TabletError::InvalidSession(id))?;
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        let mut state = handle.lock();
        state.live = false;
        if let Some(txn) = state.abandon_transaction() {
            tracing::info!(session = %id, txn = %txn, "open transaction rolled back on close");
        }
        tablet_observability::record_live_sessions(self.sessions.len());
        tracing::debug!(session = %id, "session closed");
        Ok(())
    }

    /// Invalidate every live session. Returns how many were dropped.
    pub fn invalidate_all(&self) -> usize {
        let ids = self.session_ids();
        let mut dropped = 0;
        for id in ids {
            if self.close_session(id).is_ok() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::info!("invalidated {} sessions", dropped);
        }
        dropped
    }

    /// Serve a different (keyspace, shard). Sessions issued for the old
    /// target are invalidated.
    pub fn retarget(&self, keyspace: &str, shard: &str) -> usize {
        let new_target = Target::new(keyspace, shard);
        let old = std::mem::replace(&mut *self.target.write(), new_target.clone());
        tracing::info!("tablet target changed: {} -> {}", old, new_target);
        self.invalidate_all()
    }

    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of all live session ids.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Snapshot of all live session handles.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}
