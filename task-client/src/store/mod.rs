//! Persisted task store.
//!
//! The task manager writes every persistent definition here on enqueue,
//! rewrites it when its bookkeeping changes, and removes it on completion.
//! Records are keyed by queue sequence number; `load_all` returns them in
//! sequence order so a restart rebuilds the queue in its original order.

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;
use std::path::PathBuf;

/// Task store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record not found.
    #[error("task record not found: {seq}")]
    NotFound {
        /// Sequence number of the missing record.
        seq: u64,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTask {
    /// Queue sequence number.
    pub seq: u64,
    /// Variant discriminant, for inspection without decoding.
    pub kind: String,
    /// Encoded task record.
    pub payload: Vec<u8>,
    /// Unix timestamp (seconds) of the first write.
    pub created_at: i64,
}

/// Trait for task store backends.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record.
    async fn append(&self, seq: u64, kind: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// Replace the payload of an existing record.
    async fn update(&self, seq: u64, payload: &[u8]) -> Result<(), StoreError>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn remove(&self, seq: u64) -> Result<(), StoreError>;

    /// All records, ordered by sequence number.
    async fn load_all(&self) -> Result<Vec<StoredTask>, StoreError>;

    /// Delete every record. Returns the number deleted.
    async fn clear(&self) -> Result<u64, StoreError>;
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
