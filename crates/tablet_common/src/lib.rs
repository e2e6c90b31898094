pub mod config;
pub mod error;
pub mod types;

pub use config::TabletConfig;
pub use error::{ErrorKind, TabletError, TabletResult};
pub use types::{SessionId, Target, TransactionId};
