//! In-memory task store.
//!
//! Nothing survives the process; use it where the queue is best-effort.

use super::{unix_now, StoreError, StoredTask, TaskStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Task store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<BTreeMap<u64, StoredTask>>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn append(&self, seq: u64, kind: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.insert(
            seq,
            StoredTask {
                seq,
                kind: kind.to_string(),
                payload: payload.to_vec(),
                created_at: unix_now(),
            },
        );
        Ok(())
    }

    async fn update(&self, seq: u64, payload: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&seq).ok_or(StoreError::NotFound { seq })?;
        record.payload = payload.to_vec();
        Ok(())
    }

    async fn remove(&self, seq: u64) -> Result<(), StoreError> {
        self.records.lock().await.remove(&seq);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<StoredTask>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let count = records.len() as u64;
        records.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_come_back_in_sequence_order() {
        let store = MemoryTaskStore::new();
        store.append(5, "profile_sync", b"five").await.unwrap();
        store.append(2, "settings_sync", b"two").await.unwrap();

        let seqs: Vec<u64> = store.load_all().await.unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![2, 5]);
    }

    #[tokio::test]
    async fn update_missing_record_fails() {
        let store = MemoryTaskStore::new();
        let result = store.update(1, b"x").await;
        assert!(matches!(result, Err(StoreError::NotFound { seq: 1 })));
    }

    #[tokio::test]
    async fn clear_reports_count() {
        let store = MemoryTaskStore::new();
        store.append(1, "profile_sync", b"a").await.unwrap();
        store.append(2, "profile_sync", b"b").await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
