//! Query-service wire protocol: typed bind variables, result sets and the
//! value codec that moves them across the wire.

pub mod codec;
pub mod error;
pub mod types;

pub use error::ProtocolError;
pub use types::*;
