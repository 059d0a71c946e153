//! Configuration store port.

use async_trait::async_trait;

use crate::domain::errors::DetectionResult;

/// Hierarchical key/value store holding JSON-encoded rule documents.
///
/// The catalog addresses rules at `training.log.parser.framework.<name>`;
/// keys with further dot segments below `<name>` are sub-configs and are
/// ignored by discovery.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the raw document at a key, if present.
    async fn get(&self, key: &str) -> DetectionResult<Option<String>>;

    /// Enumerate all keys under a prefix.
    async fn list_keys(&self, prefix: &str) -> DetectionResult<Vec<String>>;
}
