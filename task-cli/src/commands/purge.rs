//! Delete records from the task store.

use anyhow::Result;
use task_client::{SqliteTaskStore, TaskStore};

use super::verify::corrupt_records;

/// Run the purge command.
///
/// Deletes the record `seq`, every corrupt record, or everything.
pub async fn run(store: &SqliteTaskStore, seq: Option<u64>, corrupt: bool) -> Result<()> {
    let removed = purge(store, seq, corrupt).await?;
    println!("Removed {} record(s)", removed);
    Ok(())
}

async fn purge(store: &SqliteTaskStore, seq: Option<u64>, corrupt: bool) -> Result<u64> {
    if let Some(seq) = seq {
        // Fails with "not found" instead of silently removing nothing.
        store.get(seq).await?;
        store.remove(seq).await?;
        return Ok(1);
    }

    if corrupt {
        let records = store.load_all().await?;
        let seqs: Vec<u64> = corrupt_records(&records)
            .into_iter()
            .map(|(record, _)| record.seq)
            .collect();
        for seq in &seqs {
            store.remove(*seq).await?;
        }
        return Ok(seqs.len() as u64);
    }

    Ok(store.clear().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[tokio::test]
    async fn purge_one() {
        let store = testing::store().await;
        assert_eq!(purge(&store, Some(1), false).await.unwrap(), 1);

        let seqs: Vec<u64> = store.load_all().await.unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn purge_missing_fails() {
        let store = testing::store().await;
        assert!(purge(&store, Some(9), false).await.is_err());
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn purge_corrupt_keeps_valid_records() {
        let store = testing::store().await;
        assert_eq!(purge(&store, None, true).await.unwrap(), 1);

        let seqs: Vec<u64> = store.load_all().await.unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn purge_all() {
        let store = testing::store().await;
        assert_eq!(purge(&store, None, false).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
