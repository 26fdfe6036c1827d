//! Show one task as JSON.

use anyhow::{Context, Result};
use task_client::SqliteTaskStore;
use task_core::decode_task;

/// Run the show command.
pub async fn run(store: &SqliteTaskStore, seq: u64) -> Result<()> {
    println!("{}", render(store, seq).await?);
    Ok(())
}

async fn render(store: &SqliteTaskStore, seq: u64) -> Result<String> {
    let record = store.get(seq).await?;
    let definition = decode_task(&record.payload)
        .with_context(|| format!("Task {} ({}) cannot be decoded", seq, record.kind))?;
    Ok(serde_json::to_string_pretty(&definition)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[tokio::test]
    async fn renders_decoded_definition() {
        let store = testing::store().await;
        let json: serde_json::Value =
            serde_json::from_str(&render(&store, 2).await.unwrap()).unwrap();

        assert_eq!(json["meta"]["retry"], true);
        assert_eq!(json["kind"]["ProfileSync"]["profile"]["nickname"], "alice");
    }

    #[tokio::test]
    async fn missing_record_is_an_error() {
        let store = testing::store().await;
        let err = render(&store, 42).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let store = testing::store().await;
        let err = render(&store, 3).await.unwrap_err();
        assert!(err.to_string().contains("cannot be decoded"));
    }
}
