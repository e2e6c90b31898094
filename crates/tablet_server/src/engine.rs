//! Storage-engine seam.
//!
//! The query service never touches storage directly: it hands decoded SQL
//! plus native bind values to a [`QueryEngine`] and gets native rows back.

use std::collections::BTreeMap;

use tablet_common::error::TabletError;
use tablet_protocol::types::{Field, Value};
use thiserror::Error;

/// Decoded bind variables as handed to the engine.
pub type BindVars = BTreeMap<String, Value>;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by the storage engine. `retryable` is the engine's own
/// classification and is passed through to the caller untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}

impl From<EngineError> for TabletError {
    fn from(e: EngineError) -> Self {
        TabletError::ExecutionFailed {
            message: e.message,
            retryable: e.retryable,
        }
    }
}

/// Native result of one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    pub insert_id: u64,
}

impl RowSet {
    pub fn new(fields: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            fields,
            rows,
            rows_affected: 0,
            insert_id: 0,
        }
    }

    /// Result of a DML statement.
    pub fn affected(rows_affected: u64, insert_id: u64) -> Self {
        Self {
            rows_affected,
            insert_id,
            ..Default::default()
        }
    }
}

/// Planning statistics for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub row_count: u64,
    pub pk_column: String,
    pub pk_min: Value,
    pub pk_max: Value,
}

pub trait QueryEngine: Send + Sync {
    /// Run one statement in its own autocommit transaction.
    fn execute(&self, sql: &str, binds: &BindVars) -> EngineResult<RowSet>;

    /// Open a storage-level transaction.
    fn begin(&self) -> EngineResult<Box<dyn EngineTransaction>>;

    /// Open a cursor over a read-only statement.
    fn stream(&self, sql: &str, binds: &BindVars) -> EngineResult<Box<dyn RowCursor>>;

    fn table_stats(&self, table: &str) -> EngineResult<TableStats>;
}

/// An open storage-level transaction. Dropping it without finalizing
/// discards its writes.
pub trait EngineTransaction: Send {
    fn execute(&mut self, sql: &str, binds: &BindVars) -> EngineResult<RowSet>;
    fn commit(self: Box<Self>) -> EngineResult<()>;
    fn rollback(self: Box<Self>) -> EngineResult<()>;
}

/// Forward-only cursor. The cursor is released when dropped.
pub trait RowCursor: Send {
    fn fields(&self) -> &[Field];

    /// Up to `max_rows` rows, in engine order. An empty batch means the
    /// cursor is exhausted.
    fn next_batch(&mut self, max_rows: usize) -> EngineResult<Vec<Vec<Value>>>;
}
