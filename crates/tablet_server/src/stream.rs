//! Streamed execution.
//!
//! A producer thread owns the storage cursor and pushes one message per
//! batch into a bounded channel; the consumer pulls them through
//! [`QueryStream`]. The first message carries only the fields, every later
//! one only rows. The bounded channel is the backpressure: the producer
//! blocks once `channel_capacity` messages are waiting.
//!
//! The producer stops, and releases the cursor, when the consumer cancels
//! or drops the stream, or when the session is invalidated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tablet_common::error::{TabletError, TabletResult};
use tablet_common::types::SessionId;
use tablet_protocol::types::{BoundQuery, QueryResult, SessionRef};

use crate::engine::RowCursor;
use crate::executor::{decode_query, encode_rows, QueryExecutor, StreamOptions};
use crate::session::SessionHandle;

type Message = TabletResult<QueryResult>;

/// Consumer side of a streamed result. Finite and not restartable.
///
/// Dropping the stream cancels it.
pub struct QueryStream {
    rx: Option<Receiver<Message>>,
    cancel: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    done: bool,
}

impl QueryStream {
    /// Stop the producer. Closing the receiver wakes a producer blocked on
    /// a full channel, so the cursor is released without further reads.
    /// The next call to `next` yields `Cancelled`, then the stream ends.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.rx.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Cancel and wait for the producer to release its cursor.
    pub fn cancel_and_join(mut self) {
        self.cancel();
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                tracing::warn!("stream producer panicked");
            }
        }
    }

    /// Drain the rest of the stream into one result, fields from the first
    /// message and rows from the rest.
    pub fn collect_result(self) -> TabletResult<QueryResult> {
        let mut out = QueryResult::default();
        for (i, msg) in self.enumerate() {
            let msg = msg?;
            if i == 0 {
                out.fields = msg.fields;
            }
            out.rows.extend(msg.rows);
        }
        Ok(out)
    }
}

impl Iterator for QueryStream {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        if self.done {
            return None;
        }
        if self.is_cancelled() {
            self.done = true;
            self.rx.take();
            return Some(Err(TabletError::Cancelled));
        }
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(msg) => {
                if msg.is_err() {
                    self.done = true;
                }
                Some(msg)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        // Unblocks a producer waiting on a full channel.
        self.cancel.store(true, Ordering::Release);
        self.rx.take();
    }
}

struct Producer {
    cursor: Box<dyn RowCursor>,
    tx: SyncSender<Message>,
    cancel: Arc<AtomicBool>,
    batch_rows: usize,
    session_id: SessionId,
    session: SessionHandle,
}

impl Producer {
    fn run(self) {
        let Producer {
            mut cursor,
            tx,
            cancel,
            batch_rows,
            session_id,
            session,
        } = self;
        let fields = cursor.fields().to_vec();
        let header = QueryResult {
            fields: fields.clone(),
            ..Default::default()
        };
        if tx.send(Ok(header)).is_err() {
            return;
        }
        let mut batches = 0usize;
        let mut rows_sent = 0usize;
        loop {
            if cancel.load(Ordering::Acquire) {
                tracing::debug!(session = %session_id, batches, "stream cancelled");
                break;
            }
            if !session.lock().live {
                tracing::debug!(session = %session_id, batches, "session invalidated, stream stopped");
                let _ = tx.send(Err(TabletError::InvalidSession(session_id)));
                break;
            }
            let batch = match cursor.next_batch(batch_rows) {
                Ok(batch) if batch.is_empty() => {
                    tracing::debug!(session = %session_id, batches, rows = rows_sent, "stream finished");
                    break;
                }
                Ok(batch) => batch,
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                    break;
                }
            };
            let n = batch.len();
            let msg = encode_rows(&fields, batch).map(|rows| QueryResult {
                rows,
                ..Default::default()
            });
            let failed = msg.is_err();
            if tx.send(msg).is_err() || failed {
                break;
            }
            batches += 1;
            rows_sent += n;
            tablet_observability::record_stream_batch(n);
        }
        // Release the cursor before the thread exits.
        drop(cursor);
    }
}

impl QueryExecutor {
    /// Start a streamed execution. Streams never run inside a transaction.
    pub fn stream_execute(
        &self,
        query: &BoundQuery,
        session: SessionRef,
    ) -> TabletResult<QueryStream> {
        self.stream_execute_with(query, session, self.stream_options)
    }

    pub fn stream_execute_with(
        &self,
        query: &BoundQuery,
        session: SessionRef,
        options: StreamOptions,
    ) -> TabletResult<QueryStream> {
        self.sessions.validate(session.session_id)?;
        if let Some(txn_id) = session.transaction_id {
            return Err(TabletError::InvalidTransaction {
                session_id: session.session_id,
                reason: format!("cannot stream inside {}", txn_id),
            });
        }
        let handle = self.sessions.handle(session.session_id)?;
        let (sql, binds) = decode_query(query)?;
        let cursor = self.engine.stream(&sql, &binds)?;

        let (tx, rx) = mpsc::sync_channel(options.channel_capacity.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let producer = Producer {
            cursor,
            tx,
            cancel: cancel.clone(),
            batch_rows: options.batch_rows.max(1),
            session_id: session.session_id,
            session: handle,
        };
        let handle = std::thread::Builder::new()
            .name("tablet-stream".into())
            .spawn(move || producer.run())
            .map_err(|e| TabletError::ResourceExhausted(format!("cannot start stream: {}", e)))?;
        tracing::debug!(session = %session.session_id, "stream started");

        Ok(QueryStream {
            rx: Some(rx),
            cancel,
            producer: Some(handle),
            done: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tablet_common::error::ErrorKind;
    use tablet_common::types::Target;
    use tablet_protocol::types::{Field, FieldType, Value};

    use super::*;
    use crate::engine::{QueryEngine, RowSet};
    use crate::memory::MemoryEngine;
    use crate::session::SessionRegistry;
    use crate::transaction::TransactionCoordinator;

    const SQL: &str = "select id from big";

    fn setup(engine: MemoryEngine, rows: i64) -> (MemoryEngine, QueryExecutor, SessionId) {
        let shared: Arc<dyn QueryEngine> = Arc::new(engine.clone());
        let sessions = Arc::new(SessionRegistry::new(Target::new("ks", "0"), 0));
        let txns = Arc::new(TransactionCoordinator::new(sessions.clone(), shared.clone(), 0));
        let exec = QueryExecutor::new(
            shared,
            sessions.clone(),
            txns,
            StreamOptions {
                batch_rows: 10,
                channel_capacity: 2,
            },
        );
        engine.add_query(
            SQL,
            RowSet::new(
                vec![Field::new("id", FieldType::LongLong)],
                (0..rows).map(|i| vec![Value::Int(i)]).collect(),
            ),
        );
        let s = sessions.get_session_id("ks", "0").unwrap().session_id;
        (engine, exec, s)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_header_then_row_batches() {
        let (engine, exec, s) = setup(MemoryEngine::new(), 25);
        let msgs: Vec<_> = exec
            .stream_execute(&BoundQuery::new(SQL), SessionRef::new(s))
            .unwrap()
            .collect::<TabletResult<Vec<_>>>()
            .unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].fields.len(), 1);
        assert!(msgs[0].rows.is_empty());
        for m in &msgs[1..] {
            assert!(m.fields.is_empty());
            assert!(!m.rows.is_empty());
        }
        let sizes: Vec<usize> = msgs[1..].iter().map(|m| m.rows.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(wait_for(|| engine.open_cursors() == 0));
    }

    #[test]
    fn test_stream_matches_execute() {
        let (_engine, exec, s) = setup(MemoryEngine::new(), 37);
        let q = BoundQuery::new(SQL);
        let direct = exec.execute(&q, SessionRef::new(s)).unwrap();
        let streamed = exec
            .stream_execute(&q, SessionRef::new(s))
            .unwrap()
            .collect_result()
            .unwrap();
        assert_eq!(streamed, direct);
    }

    #[test]
    fn test_empty_result_is_header_only() {
        let (_engine, exec, s) = setup(MemoryEngine::new(), 0);
        let msgs: Vec<_> = exec
            .stream_execute(&BoundQuery::new(SQL), SessionRef::new(s))
            .unwrap()
            .collect();
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_cancel_yields_cancelled_then_ends() {
        let engine = MemoryEngine::new().with_cursor_delay(Duration::from_millis(2));
        let (engine, exec, s) = setup(engine, 1000);
        let mut stream = exec
            .stream_execute(&BoundQuery::new(SQL), SessionRef::new(s))
            .unwrap();
        assert!(stream.next().unwrap().is_ok());
        stream.cancel();
        let err = stream.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(stream.next().is_none());
        stream.cancel_and_join();
        assert_eq!(engine.open_cursors(), 0);
    }

    #[test]
    fn test_drop_releases_cursor() {
        let engine = MemoryEngine::new().with_cursor_delay(Duration::from_millis(2));
        let (engine, exec, s) = setup(engine, 1000);
        let mut stream = exec
            .stream_execute(&BoundQuery::new(SQL), SessionRef::new(s))
            .unwrap();
        stream.next();
        stream.next();
        assert_eq!(engine.open_cursors(), 1);
        drop(stream);
        assert!(wait_for(|| engine.open_cursors() == 0));
    }

    #[test]
    fn test_cancel_without_consuming_releases_cursor() {
        let (engine, exec, s) = setup(MemoryEngine::new(), 100);
        let options = StreamOptions {
            batch_rows: 1,
            channel_capacity: 1,
        };
        let mut stream = exec
            .stream_execute_with(&BoundQuery::new(SQL), SessionRef::new(s), options)
            .unwrap();
        // Header fills the channel; the producer blocks sending the first batch.
        assert!(wait_for(|| engine.rows_streamed() >= 1));
        assert_eq!(engine.open_cursors(), 1);
        stream.cancel();
        assert!(wait_for(|| engine.open_cursors() == 0));
        assert!(engine.rows_streamed() < 100);
        assert_eq!(stream.next().unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_producer_waits_for_consumer() {
        let (engine, exec, s) = setup(MemoryEngine::new(), 1000);
        let options = StreamOptions {
            batch_rows: 10,
            channel_capacity: 2,
        };
        let stream = exec
            .stream_execute_with(&BoundQuery::new(SQL), SessionRef::new(s), options)
            .unwrap();
        assert!(wait_for(|| engine.rows_streamed() > 0));
        std::thread::sleep(Duration::from_millis(100));
        assert!(engine.rows_streamed() <= (options.channel_capacity + 1) * options.batch_rows);

        let all = stream.collect_result().unwrap();
        assert_eq!(all.rows.len(), 1000);
        assert_eq!(engine.rows_streamed(), 1000);
    }

    #[test]
    fn test_closed_session_stops_stream() {
        let engine = MemoryEngine::new().with_cursor_delay(Duration::from_millis(2));
        let (engine, exec, s) = setup(engine, 1000);
        let mut stream = exec
            .stream_execute(&BoundQuery::new(SQL), SessionRef::new(s))
            .unwrap();
        assert!(stream.next().unwrap().is_ok());
        exec.sessions.close_session(s).unwrap();

        let rest: Vec<_> = stream.collect();
        let err = rest.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSession);
        let rows: usize = rest.iter().flatten().map(|m| m.rows.len()).sum();
        assert!(rows < 1000);
        assert!(wait_for(|| engine.open_cursors() == 0));
    }

    #[test]
    fn test_stream_in_transaction_rejected() {
        let (engine, exec, s) = setup(MemoryEngine::new(), 3);
        let t = exec.txns.begin(s).unwrap().transaction_id;
        let err = exec
            .stream_execute(&BoundQuery::new(SQL), SessionRef::in_transaction(s, t))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidTransaction);
        assert_eq!(engine.open_cursors(), 0);
    }

    #[test]
    fn test_open_failure_is_synchronous() {
        let (engine, exec, s) = setup(MemoryEngine::new(), 3);
        engine.add_failure("select * from gone", "table dropped", false);
        let err = exec
            .stream_execute(&BoundQuery::new("select * from gone"), SessionRef::new(s))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    }
}
