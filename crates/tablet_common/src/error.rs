use thiserror::Error;

use crate::types::{SessionId, Target, TransactionId};

/// Convenience alias for `Result<T, TabletError>`.
pub type TabletResult<T> = Result<T, TabletError>;

/// Client-visible error classification.
///
/// The numeric order is not part of any wire contract; kinds travel by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    WrongShard,
    InvalidSession,
    TransactionAlreadyOpen,
    NoOpenTransaction,
    InvalidTransaction,
    Malformed,
    ExecutionFailed,
    Cancelled,
    BadRequest,
    ResourceExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WrongShard => "wrong_shard",
            ErrorKind::InvalidSession => "invalid_session",
            ErrorKind::TransactionAlreadyOpen => "transaction_already_open",
            ErrorKind::NoOpenTransaction => "no_open_transaction",
            ErrorKind::InvalidTransaction => "invalid_transaction",
            ErrorKind::Malformed => "malformed",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ResourceExhausted => "resource_exhausted",
        }
    }
}

/// Every error a tablet call can surface. Scoped to the failing call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TabletError {
    #[error("Wrong shard: requested {requested}, serving {serving}")]
    WrongShard { requested: Target, serving: Target },

    #[error("Invalid session: {0}")]
    InvalidSession(SessionId),

    #[error("{session_id} already has open transaction {transaction_id}")]
    TransactionAlreadyOpen {
        session_id: SessionId,
        transaction_id: TransactionId,
    },

    #[error("{0} has no open transaction")]
    NoOpenTransaction(SessionId),

    #[error("Invalid transaction for {session_id}: {reason}")]
    InvalidTransaction { session_id: SessionId, reason: String },

    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Opaque storage-engine failure. `retryable` is the engine's own hint.
    #[error("Execution failed: {message}")]
    ExecutionFailed { message: String, retryable: bool },

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl TabletError {
    pub fn execution(message: impl Into<String>, retryable: bool) -> Self {
        TabletError::ExecutionFailed {
            message: message.into(),
            retryable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TabletError::WrongShard { .. } => ErrorKind::WrongShard,
            TabletError::InvalidSession(_) => ErrorKind::InvalidSession,
            TabletError::TransactionAlreadyOpen { .. } => ErrorKind::TransactionAlreadyOpen,
            TabletError::NoOpenTransaction(_) => ErrorKind::NoOpenTransaction,
            TabletError::InvalidTransaction { .. } => ErrorKind::InvalidTransaction,
            TabletError::Malformed(_) => ErrorKind::Malformed,
            TabletError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            TabletError::Cancelled => ErrorKind::Cancelled,
            TabletError::BadRequest(_) => ErrorKind::BadRequest,
            TabletError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            TabletError::ExecutionFailed { retryable, .. } => *retryable,
            TabletError::ResourceExhausted(_) => true,
            _ => false,
        }
    }
}
