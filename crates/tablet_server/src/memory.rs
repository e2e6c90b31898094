//! Scripted in-memory [`QueryEngine`] for tests and local wiring.
//!
//! Results are canned per SQL text. Statements that are not `SELECT` count
//! as writes: applied immediately under autocommit, buffered inside a
//! transaction and applied on commit. Counters for open cursors and open
//! transactions let callers assert that nothing leaks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tablet_protocol::types::{Field, Value};

use crate::engine::*;

#[derive(Default)]
struct Script {
    results: HashMap<String, RowSet>,
    failures: HashMap<String, EngineError>,
    stats: HashMap<String, TableStats>,
    executed: Vec<String>,
    applied_writes: Vec<String>,
    commits: usize,
    rollbacks: usize,
    fail_commit: Option<EngineError>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    open_cursors: AtomicUsize,
    rows_streamed: AtomicUsize,
    open_transactions: AtomicUsize,
}

impl Shared {
    fn lookup(&self, sql: &str) -> EngineResult<RowSet> {
        let key = sql.trim();
        let mut script = self.script.lock();
        script.executed.push(key.to_string());
        if let Some(err) = script.failures.get(key) {
            return Err(err.clone());
        }
        script
            .results
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::new(format!("unknown statement: {}", key), false))
    }
}

fn is_write(sql: &str) -> bool {
    !sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

#[derive(Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
    cursor_delay: Option<Duration>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every cursor batch, to simulate slow storage.
    pub fn with_cursor_delay(mut self, delay: Duration) -> Self {
        self.cursor_delay = Some(delay);
        self
    }

    pub fn add_query(&self, sql: &str, result: RowSet) {
        self.shared
            .script
            .lock()
            .results
            .insert(sql.trim().to_string(), result);
    }

    pub fn add_failure(&self, sql: &str, message: &str, retryable: bool) {
        self.shared
            .script
            .lock()
            .failures
            .insert(sql.trim().to_string(), EngineError::new(message, retryable));
    }

    pub fn set_table_stats(&self, table: &str, stats: TableStats) {
        self.shared
            .script
            .lock()
            .stats
            .insert(table.to_string(), stats);
    }

    /// Make every subsequent commit fail with `message`.
    pub fn fail_commits(&self, message: &str) {
        self.shared.script.lock().fail_commit = Some(EngineError::new(message, false));
    }

    /// Every statement the engine was asked to run, in order.
    pub fn executed(&self) -> Vec<String> {
        self.shared.script.lock().executed.clone()
    }

    /// Writes that became durable, in apply order.
    pub fn applied_writes(&self) -> Vec<String> {
        self.shared.script.lock().applied_writes.clone()
    }

    pub fn commits(&self) -> usize {
        self.shared.script.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.script.lock().rollbacks
    }

    pub fn open_cursors(&self) -> usize {
        self.shared.open_cursors.load(Ordering::Acquire)
    }

    /// Rows handed out by all cursors so far.
    pub fn rows_streamed(&self) -> usize {
        self.shared.rows_streamed.load(Ordering::Acquire)
    }

    pub fn open_transactions(&self) -> usize {
        self.shared.open_transactions.load(Ordering::Acquire)
    }
}

impl QueryEngine for MemoryEngine {
    fn execute(&self, sql: &str, _binds: &BindVars) -> EngineResult<RowSet> {
        let result = self.shared.lookup(sql)?;
        if is_write(sql) {
            self.shared
                .script
                .lock()
                .applied_writes
                .push(sql.trim().to_string());
        }
        Ok(result)
    }

    fn begin(&self) -> EngineResult<Box<dyn EngineTransaction>> {
        self.shared.open_transactions.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            pending: Vec::new(),
            finished: false,
        }))
    }

    fn stream(&self, sql: &str, _binds: &BindVars) -> EngineResult<Box<dyn RowCursor>> {
        let result = self.shared.lookup(sql)?;
        self.shared.open_cursors.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryCursor {
            fields: result.fields,
            rows: result.rows.into(),
            delay: self.cursor_delay,
            shared: self.shared.clone(),
        }))
    }

    fn table_stats(&self, table: &str) -> EngineResult<TableStats> {
        self.shared
            .script
            .lock()
            .stats
            .get(table)
            .cloned()
            .ok_or_else(|| EngineError::new(format!("no statistics for table {}", table), false))
    }
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    pending: Vec<String>,
    finished: bool,
}

impl MemoryTransaction {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.open_transactions.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl EngineTransaction for MemoryTransaction {
    fn execute(&mut self, sql: &str, _binds: &BindVars) -> EngineResult<RowSet> {
        let result = self.shared.lookup(sql)?;
        if is_write(sql) {
            self.pending.push(sql.trim().to_string());
        }
        Ok(result)
    }

    fn commit(mut self: Box<Self>) -> EngineResult<()> {
        self.finish();
        let mut script = self.shared.script.lock();
        if let Some(err) = script.fail_commit.clone() {
            script.rollbacks += 1;
            return Err(err);
        }
        script.commits += 1;
        let pending = std::mem::take(&mut self.pending);
        script.applied_writes.extend(pending);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> EngineResult<()> {
        self.finish();
        self.shared.script.lock().rollbacks += 1;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish();
    }
}

struct MemoryCursor {
    fields: Vec<Field>,
    rows: VecDeque<Vec<Value>>,
    delay: Option<Duration>,
    shared: Arc<Shared>,
}

impl RowCursor for MemoryCursor {
    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn next_batch(&mut self, max_rows: usize) -> EngineResult<Vec<Vec<Value>>> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let n = max_rows.min(self.rows.len());
        self.shared.rows_streamed.fetch_add(n, Ordering::AcqRel);
        Ok(self.rows.drain(..n).collect())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.shared.open_cursors.fetch_sub(1, Ordering::AcqRel);
    }
}
