use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TabletError, TabletResult};
use crate::types::Target;

/// Tablet query-service configuration, usually read from `tablet.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletConfig {
    /// Keyspace this tablet serves.
    pub keyspace: String,
    /// Shard name within the keyspace (e.g. "0", "-80").
    pub shard: String,
    /// Maximum live sessions (0 = unlimited).
    pub max_sessions: usize,
    /// Rows per streamed result message.
    pub stream_batch_rows: usize,
    /// Produced-but-unconsumed stream messages before the producer blocks.
    pub stream_channel_capacity: usize,
    /// Open transactions older than this are rolled back by the reaper (0 = never).
    pub transaction_timeout_ms: u64,
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            keyspace: "test_keyspace".into(),
            shard: "0".into(),
            max_sessions: 0,
            stream_batch_rows: 128,
            stream_channel_capacity: 4,
            transaction_timeout_ms: 0,
        }
    }
}

impl TabletConfig {
    pub fn target(&self) -> Target {
        Target::new(self.keyspace.clone(), self.shard.clone())
    }

    pub fn from_toml_str(s: &str) -> TabletResult<Self> {
        let config: TabletConfig = toml::from_str(s)
            .map_err(|e| TabletError::BadRequest(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> TabletResult<Self> {
        if !path.exists() {
            tracing::warn!("config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| TabletError::BadRequest(format!("cannot read {:?}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> TabletResult<()> {
        if self.keyspace.is_empty() || self.shard.is_empty() {
            return Err(TabletError::BadRequest(
                "keyspace and shard must be non-empty".into(),
            ));
        }
        if self.stream_batch_rows == 0 {
            return Err(TabletError::BadRequest("stream_batch_rows must be > 0".into()));
        }
        if self.stream_channel_capacity == 0 {
            return Err(TabletError::BadRequest(
                "stream_channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}
