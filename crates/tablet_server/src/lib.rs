//! Query-serving protocol layer for a single tablet: sessions, transactions,
//! single/batched/streamed execution and split-query planning over an
//! opaque storage engine.

pub mod batch;
pub mod engine;
pub mod executor;
pub mod memory;
pub mod server;
pub mod session;
pub mod split;
pub mod stream;
pub mod transaction;

pub use batch::{BatchFailure, BatchResult};
pub use engine::{EngineError, QueryEngine, RowSet, TableStats};
pub use memory::MemoryEngine;
pub use server::{ErrorInfo, Request, Response, TabletServer};
pub use stream::QueryStream;
