//! Transaction coordinator.
//!
//! Per session: `NONE -> (begin) -> OPEN -> (commit | rollback) -> NONE`.
//! Every transition and every statement run inside a transaction happens
//! under the owning session's lock, so concurrent begins resolve to one
//! OPEN transition and no statement can straddle finalization.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tablet_common::error::{TabletError, TabletResult};
use tablet_common::types::{SessionId, TransactionId};
use tablet_protocol::types::{SessionRef, TransactionInfo};

use crate::engine::{EngineTransaction, QueryEngine};
use crate::session::{OpenTransaction, SessionRegistry, SessionState};

pub struct TransactionCoordinator {
    sessions: Arc<SessionRegistry>,
    engine: Arc<dyn QueryEngine>,
    next_id: AtomicI64,
    timeout: Option<Duration>,
}

/// Check that `txn_id` names the session's current open transaction.
fn check_transaction(
    state: &mut SessionState,
    txn_id: TransactionId,
) -> TabletResult<&mut OpenTransaction> {
    let session_id = state.id;
    match state.txn.as_mut() {
        Some(txn) if txn.id == txn_id => Ok(txn),
        Some(txn) => Err(TabletError::InvalidTransaction {
            session_id,
            reason: format!("{} is not the open transaction ({})", txn_id, txn.id),
        }),
        None => Err(TabletError::InvalidTransaction {
            session_id,
            reason: format!("{} is not open", txn_id),
        }),
    }
}

impl TransactionCoordinator {
    /// `timeout_ms == 0` disables reaping.
    pub fn new(sessions: Arc<SessionRegistry>, engine: Arc<dyn QueryEngine>, timeout_ms: u64) -> Self {
        Self {
            sessions,
            engine,
            next_id: AtomicI64::new(1),
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }

    pub fn begin(&self, session_id: SessionId) -> TabletResult<TransactionInfo> {
        self.sessions.with_session(session_id, |state| {
            if let Some(open) = &state.txn {
                return Err(TabletError::TransactionAlreadyOpen {
                    session_id,
                    transaction_id: open.id,
                });
            }
            let handle = self.engine.begin()?;
            let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            state.txn = Some(OpenTransaction {
                id,
                started_at: Instant::now(),
                handle,
            });
            tablet_observability::record_txn_metrics("begin");
            tracing::debug!(session = %session_id, txn = %id, "transaction opened");
            Ok(TransactionInfo { transaction_id: id })
        })
    }

    /// Finalize and detach the open transaction. If the caller named a
    /// transaction id it must match.
    fn take_open(state: &mut SessionState, session: SessionRef) -> TabletResult<OpenTransaction> {
        if let Some(txn_id) = session.transaction_id {
            check_transaction(state, txn_id)?;
        }
        state
            .txn
            .take()
            .ok_or(TabletError::NoOpenTransaction(session.session_id))
    }

    /// Apply the open transaction's writes. The transaction is finalized
    /// even when the engine commit fails.
    pub fn commit(&self, session: SessionRef) -> TabletResult<()> {
        self.sessions.with_session(session.session_id, |state| {
            let txn = Self::take_open(state, session)?;
            tablet_observability::record_txn_metrics("commit");
            tracing::debug!(session = %session.session_id, txn = %txn.id, "commit");
            txn.handle.commit().map_err(TabletError::from)
        })
    }

    pub fn rollback(&self, session: SessionRef) -> TabletResult<()> {
        self.sessions.with_session(session.session_id, |state| {
            let txn = Self::take_open(state, session)?;
            tablet_observability::record_txn_metrics("rollback");
            tracing::debug!(session = %session.session_id, txn = %txn.id, "rollback");
            txn.handle.rollback().map_err(TabletError::from)
        })
    }

    /// Fail with `InvalidTransaction` unless `session` names the session's
    /// open transaction. A reference without a transaction id always passes.
    pub fn check_transaction(&self, session: SessionRef) -> TabletResult<()> {
        self.sessions.with_session(session.session_id, |state| {
            match session.transaction_id {
                Some(txn_id) => check_transaction(state, txn_id).map(|_| ()),
                None => Ok(()),
            }
        })
    }

    /// Run `f` against the session's open transaction while holding the
    /// session lock.
    pub fn run_in_transaction<R>(
        &self,
        session_id: SessionId,
        txn_id: TransactionId,
        f: impl FnOnce(&mut dyn EngineTransaction) -> TabletResult<R>,
    ) -> TabletResult<R> {
        self.sessions.with_session(session_id, |state| {
            let txn = check_transaction(state, txn_id)?;
            f(txn.handle.as_mut())
        })
    }

    /// Roll back transactions that have been open longer than the
    /// configured timeout. Returns the number reaped.
    pub fn reap_expired(&self, now: Instant) -> usize {
        let Some(timeout) = self.timeout else {
            return 0;
        };
        let mut reaped = 0;
        for handle in self.sessions.handles() {
            let mut state = handle.lock();
            let expired = state
                .txn
                .as_ref()
                .is_some_and(|t| now.saturating_duration_since(t.started_at) >= timeout);
            if !state.live || !expired {
                continue;
            }
            if let Some(txn) = state.txn.take() {
                if let Err(e) = txn.handle.rollback() {
                    tracing::warn!(session = %state.id, txn = %txn.id, "reaper rollback failed: {}", e);
                }
                tracing::info!(session = %state.id, txn = %txn.id, "rolled back expired transaction");
                tablet_observability::record_txn_metrics("reap");
                reaped += 1;
            }
        }
        reaped
    }
}
