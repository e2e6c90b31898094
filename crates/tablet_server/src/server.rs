//! Tablet query service.
//!
//! Owns the session registry, transaction coordinator, executor and split
//! planner for one storage engine, and maps each RPC onto them.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tablet_common::config::TabletConfig;
use tablet_common::error::{ErrorKind, TabletError, TabletResult};
use tablet_common::types::SessionId;
use tablet_protocol::codec::{decode_bound_query, encode_query_result};
use tablet_protocol::types::*;

use crate::batch::BatchResult;
use crate::engine::QueryEngine;
use crate::executor::{QueryExecutor, StreamOptions};
use crate::session::SessionRegistry;
use crate::split::SplitPlanner;
use crate::stream::QueryStream;
use crate::transaction::TransactionCoordinator;

/// Client-visible form of a [`TabletError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl From<&TabletError> for ErrorInfo {
    fn from(e: &TabletError) -> Self {
        Self {
            kind: e.kind(),
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

/// One unary RPC.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetSessionId { keyspace: String, shard: String },
    Execute { query: BoundQuery, session: SessionRef },
    ExecuteBatch { queries: Vec<BoundQuery>, session: SessionRef },
    Begin { session_id: SessionId },
    Commit { session: SessionRef },
    Rollback { session: SessionRef },
    SplitQuery { request: SplitQueryRequest, session: SessionRef },
    CloseSession { session_id: SessionId },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetSessionId { .. } => "get_session_id",
            Request::Execute { .. } => "execute",
            Request::ExecuteBatch { .. } => "execute_batch",
            Request::Begin { .. } => "begin",
            Request::Commit { .. } => "commit",
            Request::Rollback { .. } => "rollback",
            Request::SplitQuery { .. } => "split_query",
            Request::CloseSession { .. } => "close_session",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Session(SessionInfo),
    Result(QueryResult),
    /// Partial results plus the index and error of the query that stopped
    /// the batch, if any.
    Batch {
        results: Vec<QueryResult>,
        failure: Option<(usize, ErrorInfo)>,
    },
    Transaction(TransactionInfo),
    Splits(SplitQueryResult),
    Done,
    Error(ErrorInfo),
}

impl From<BatchResult> for Response {
    fn from(b: BatchResult) -> Self {
        Response::Batch {
            results: b.results,
            failure: b.failure.map(|f| (f.index, ErrorInfo::from(&f.error))),
        }
    }
}

/// The tablet query-service state.
pub struct TabletServer {
    pub config: TabletConfig,
    sessions: Arc<SessionRegistry>,
    txns: Arc<TransactionCoordinator>,
    executor: QueryExecutor,
    planner: SplitPlanner,
}

impl TabletServer {
    pub fn new(config: TabletConfig, engine: Arc<dyn QueryEngine>) -> TabletResult<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionRegistry::new(config.target(), config.max_sessions));
        let txns = Arc::new(TransactionCoordinator::new(
            sessions.clone(),
            engine.clone(),
            config.transaction_timeout_ms,
        ));
        let executor = QueryExecutor::new(
            engine.clone(),
            sessions.clone(),
            txns.clone(),
            StreamOptions::from_config(&config),
        );
        tracing::info!("tablet serving {}", config.target());
        Ok(Self {
            planner: SplitPlanner::new(engine),
            config,
            sessions,
            txns,
            executor,
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn timed<T>(&self, rpc: &str, f: impl FnOnce() -> TabletResult<T>) -> TabletResult<T> {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed().as_micros() as u64;
        tablet_observability::record_query_metrics(elapsed, rpc, result.is_ok());
        if let Err(e) = &result {
            tracing::debug!(rpc, kind = e.kind().as_str(), "call failed: {}", e);
        }
        result
    }

    pub fn get_session_id(&self, keyspace: &str, shard: &str) -> TabletResult<SessionInfo> {
        self.timed("get_session_id", || self.sessions.get_session_id(keyspace, shard))
    }

    pub fn execute(&self, query: &BoundQuery, session: SessionRef) -> TabletResult<QueryResult> {
        self.timed("execute", || self.executor.execute(query, session))
    }

    pub fn execute_batch(
        &self,
        queries: &[BoundQuery],
        session: SessionRef,
    ) -> TabletResult<BatchResult> {
        self.timed("execute_batch", || self.executor.execute_batch(queries, session))
    }

    pub fn stream_execute(
        &self,
        query: &BoundQuery,
        session: SessionRef,
    ) -> TabletResult<QueryStream> {
        self.timed("stream_execute", || self.executor.stream_execute(query, session))
    }

    pub fn begin(&self, session_id: SessionId) -> TabletResult<TransactionInfo> {
        self.timed("begin", || self.txns.begin(session_id))
    }

    pub fn commit(&self, session: SessionRef) -> TabletResult<()> {
        self.timed("commit", || self.txns.commit(session))
    }

    pub fn rollback(&self, session: SessionRef) -> TabletResult<()> {
        self.timed("rollback", || self.txns.rollback(session))
    }

    pub fn split_query(
        &self,
        request: &SplitQueryRequest,
        session: SessionRef,
    ) -> TabletResult<SplitQueryResult> {
        self.timed("split_query", || {
            self.sessions.validate(session.session_id)?;
            self.planner.split_query(request)
        })
    }

    pub fn close_session(&self, session_id: SessionId) -> TabletResult<()> {
        self.timed("close_session", || self.sessions.close_session(session_id))
    }

    /// Tablet role change: serve a new target and drop every session.
    pub fn retarget(&self, keyspace: &str, shard: &str) -> usize {
        self.sessions.retarget(keyspace, shard)
    }

    /// Roll back transactions past `transaction_timeout_ms`.
    pub fn reap_expired(&self) -> usize {
        self.txns.reap_expired(Instant::now())
    }

    /// Execute a wire-encoded bound query and return the wire-encoded result.
    pub fn execute_encoded(&self, input: &[u8], session: SessionRef) -> TabletResult<BytesMut> {
        let query = decode_bound_query(input)?;
        let result = self.execute(&query, session)?;
        Ok(encode_query_result(&result)?)
    }

    /// Dispatch one unary request. Errors come back as `Response::Error`.
    pub fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::GetSessionId { keyspace, shard } => {
                self.get_session_id(&keyspace, &shard).map(Response::Session)
            }
            Request::Execute { query, session } => self.execute(&query, session).map(Response::Result),
            Request::ExecuteBatch { queries, session } => {
                self.execute_batch(&queries, session).map(Response::from)
            }
            Request::Begin { session_id } => self.begin(session_id).map(Response::Transaction),
            Request::Commit { session } => self.commit(session).map(|_| Response::Done),
            Request::Rollback { session } => self.rollback(session).map(|_| Response::Done),
            Request::SplitQuery { request, session } => {
                self.split_query(&request, session).map(Response::Splits)
            }
            Request::CloseSession { session_id } => {
                self.close_session(session_id).map(|_| Response::Done)
            }
        };
        result.unwrap_or_else(|e| Response::Error(ErrorInfo::from(&e)))
    }
}
