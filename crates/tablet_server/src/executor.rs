//! Bridge between query-service requests and the storage engine.
//!
//! Converts `BoundQuery` → validate session → decode binds → engine →
//! `QueryResult`.

use std::sync::Arc;

use tablet_common::config::TabletConfig;
use tablet_common::error::{TabletError, TabletResult};
use tablet_protocol::codec::{decode_value, validate_bind_variables, value_to_cell};
use tablet_protocol::types::*;

use crate::engine::{BindVars, QueryEngine, RowSet};
use crate::session::SessionRegistry;
use crate::transaction::TransactionCoordinator;

/// Rows per message and channel depth for streamed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub batch_rows: usize,
    pub channel_capacity: usize,
}

impl StreamOptions {
    pub fn from_config(config: &TabletConfig) -> Self {
        Self {
            batch_rows: config.stream_batch_rows.max(1),
            channel_capacity: config.stream_channel_capacity.max(1),
        }
    }
}

/// Execution bridge shared by single, batched and streamed execution.
pub struct QueryExecutor {
    pub(crate) engine: Arc<dyn QueryEngine>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) txns: Arc<TransactionCoordinator>,
    pub(crate) stream_options: StreamOptions,
}

impl QueryExecutor {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        sessions: Arc<SessionRegistry>,
        txns: Arc<TransactionCoordinator>,
        stream_options: StreamOptions,
    ) -> Self {
        Self {
            engine,
            sessions,
            txns,
            stream_options,
        }
    }

    /// Execute one bound query.
    ///
    /// With a transaction id the statement runs inside that transaction,
    /// which must be the session's open one. Without, it autocommits.
    /// Session and transaction checks, then bind decoding, all happen
    /// before the engine is called.
    pub fn execute(&self, query: &BoundQuery, session: SessionRef) -> TabletResult<QueryResult> {
        match session.transaction_id {
            Some(txn_id) => self.txns.run_in_transaction(session.session_id, txn_id, |txn| {
                let (sql, binds) = decode_query(query)?;
                let rows = txn.execute(&sql, &binds)?;
                encode_result(rows)
            }),
            None => {
                self.sessions.validate(session.session_id)?;
                let (sql, binds) = decode_query(query)?;
                let rows = self.engine.execute(&sql, &binds)?;
                encode_result(rows)
            }
        }
    }
}

/// Decode SQL text and bind variables, rejecting anything malformed.
pub fn decode_query(query: &BoundQuery) -> TabletResult<(String, BindVars)> {
    let sql = std::str::from_utf8(&query.sql)
        .map_err(|e| TabletError::Malformed(format!("sql is not valid UTF-8: {}", e)))?
        .to_string();
    validate_bind_variables(&query.bind_variables)?;
    let binds = query
        .bind_variables
        .iter()
        .map(|(name, bv)| (name.clone(), decode_value(bv)))
        .collect();
    Ok((sql, binds))
}

/// Encode engine rows into cells. Rows must match the field count and hold
/// only scalar values.
pub fn encode_rows(fields: &[Field], rows: Vec<Vec<Value>>) -> TabletResult<Vec<Row>> {
    rows.into_iter()
        .map(|values| {
            if values.len() != fields.len() {
                return Err(TabletError::execution(
                    format!(
                        "engine returned a row of {} values for {} fields",
                        values.len(),
                        fields.len()
                    ),
                    false,
                ));
            }
            let cells = values
                .iter()
                .map(|v| {
                    value_to_cell(v).map_err(|e| TabletError::execution(e.to_string(), false))
                })
                .collect::<TabletResult<Vec<_>>>()?;
            Ok(Row { cells })
        })
        .collect()
}

pub fn encode_result(rs: RowSet) -> TabletResult<QueryResult> {
    let rows = encode_rows(&rs.fields, rs.rows)?;
    Ok(QueryResult {
        fields: rs.fields,
        rows_affected: rs.rows_affected,
        insert_id: rs.insert_id,
        rows,
    })
}
