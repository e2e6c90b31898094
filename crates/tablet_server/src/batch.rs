//! Ordered batch execution with partial-success reporting.

use tablet_common::error::{TabletError, TabletResult};
use tablet_protocol::types::{BoundQuery, QueryResult, SessionRef};

use crate::executor::QueryExecutor;

/// The query that stopped a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub index: usize,
    pub error: TabletError,
}

/// `results[i]` belongs to `queries[i]`. When `failure` is set, `results`
/// holds exactly the queries before `failure.index`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResult {
    pub results: Vec<QueryResult>,
    pub failure: Option<BatchFailure>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

impl QueryExecutor {
    /// Run `queries` in order under one session (and transaction, if
    /// given). Stops at the first failing query; earlier results are kept
    /// and, outside a transaction, their effects stay applied.
    ///
    /// Session and transaction errors fail the whole call before any query
    /// runs.
    pub fn execute_batch(
        &self,
        queries: &[BoundQuery],
        session: SessionRef,
    ) -> TabletResult<BatchResult> {
        self.sessions.validate(session.session_id)?;
        self.txns.check_transaction(session)?;

        let mut results = Vec::with_capacity(queries.len());
        for (index, query) in queries.iter().enumerate() {
            match self.execute(query, session) {
                Ok(r) => results.push(r),
                Err(error) => {
                    tracing::debug!(
                        session = %session.session_id,
                        index,
                        "batch stopped: {}",
                        error
                    );
                    return Ok(BatchResult {
                        results,
                        failure: Some(BatchFailure { index, error }),
                    });
                }
            }
        }
        Ok(BatchResult {
            results,
            failure: None,
        })
    }
}
