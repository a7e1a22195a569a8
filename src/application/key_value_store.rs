// Key-value store trait for persisted dashboard state
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove '{key}': {source}")]
    Remove {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid key '{0}'")]
    InvalidKey(String),
}

/// Opaque string blobs by key. Each persisted key has exactly one owner in
/// the application layer.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
