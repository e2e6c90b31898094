#![allow(dead_code, unused_imports)]

pub use std::sync::Arc;

pub use tablet_common::config::TabletConfig;
pub use tablet_common::error::{ErrorKind, TabletError};
pub use tablet_common::types::{SessionId, TransactionId};
pub use tablet_protocol::types::*;
pub use tablet_server::engine::{RowSet, TableStats};
pub use tablet_server::memory::MemoryEngine;
pub use tablet_server::TabletServer;

pub fn setup() -> (MemoryEngine, TabletServer) {
    setup_with(TabletConfig::default())
}

pub fn setup_with(config: TabletConfig) -> (MemoryEngine, TabletServer) {
    let engine = MemoryEngine::new();
    let server = TabletServer::new(config, Arc::new(engine.clone())).unwrap();
    (engine, server)
}

pub fn session(server: &TabletServer) -> SessionId {
    server
        .get_session_id("test_keyspace", "0")
        .unwrap()
        .session_id
}

/// `users(id BIGINT PRIMARY KEY, name VARCHAR, balance BIGINT UNSIGNED)`
/// with `n` rows, ids 1..=n.
pub fn users_table(engine: &MemoryEngine, n: i64) {
    let fields = vec![
        Field::new("id", FieldType::LongLong).with_flags(FLAG_PRI_KEY | FLAG_NOT_NULL),
        Field::new("name", FieldType::VarString),
        Field::new("balance", FieldType::LongLong).with_flags(FLAG_UNSIGNED),
    ];
    let rows = (1..=n)
        .map(|i| {
            let name = if i % 5 == 0 {
                Value::Null
            } else {
                Value::from(format!("user{}", i).as_str())
            };
            vec![Value::Int(i), name, Value::Uint(i as u64 * 10)]
        })
        .collect();
    engine.add_query("select * from users", RowSet::new(fields, rows));
    engine.set_table_stats(
        "users",
        TableStats {
            row_count: n as u64,
            pk_column: "id".into(),
            pk_min: Value::Int(1),
            pk_max: Value::Int(n),
        },
    );
}
