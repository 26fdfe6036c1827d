//! Decode every record and report corrupt ones.

use anyhow::{bail, Result};
use task_client::{SqliteTaskStore, StoredTask, TaskStore};
use task_core::{decode_task, CodecError};

/// Run the verify command. Fails when any record is corrupt.
pub async fn run(store: &SqliteTaskStore) -> Result<()> {
    let records = store.load_all().await?;
    let corrupt = corrupt_records(&records);

    for (record, error) in &corrupt {
        println!("CORRUPT {} ({}): {}", record.seq, record.kind, error);
    }
    println!(
        "{} record(s), {} valid, {} corrupt",
        records.len(),
        records.len() - corrupt.len(),
        corrupt.len()
    );

    if !corrupt.is_empty() {
        bail!(
            "{} corrupt record(s); run 'taskq purge --corrupt' to remove them",
            corrupt.len()
        );
    }
    Ok(())
}

/// Records that fail to decode, with the reason.
pub(crate) fn corrupt_records(records: &[StoredTask]) -> Vec<(&StoredTask, CodecError)> {
    records
        .iter()
        .filter_map(|record| {
            decode_task(&record.payload)
                .err()
                .map(|error| (record, error))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[tokio::test]
    async fn finds_the_corrupt_record() {
        let store = testing::store().await;
        let records = store.load_all().await.unwrap();

        let corrupt = corrupt_records(&records);
        assert_eq!(corrupt.len(), 1);
        assert_eq!(corrupt[0].0.seq, 3);
    }

    #[tokio::test]
    async fn fails_on_corrupt_store() {
        let store = testing::store().await;
        assert!(run(&store).await.is_err());
    }

    #[tokio::test]
    async fn passes_on_clean_store() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        assert!(run(&store).await.is_ok());
    }
}
