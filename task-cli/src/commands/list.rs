//! List pending tasks.

use anyhow::Result;
use task_client::{SqliteTaskStore, StoredTask, TaskStore};
use task_core::{decode_task, TaskKind};

/// Run the list command.
pub async fn run(store: &SqliteTaskStore) -> Result<()> {
    let records = store.load_all().await?;
    if records.is_empty() {
        println!("No pending tasks");
        return Ok(());
    }

    println!(
        "{:>6}  {:<24}  {:<11}  {:>5}  {:>4}  ID",
        "SEQ", "KIND", "STATE", "RETRY", "SENT"
    );
    for line in lines(&records) {
        println!("{}", line);
    }
    println!();
    println!("{} task(s)", records.len());
    Ok(())
}

/// One line per record, in sequence order.
fn lines(records: &[StoredTask]) -> Vec<String> {
    records
        .iter()
        .map(|record| match decode_task(&record.payload) {
            Ok(definition) => format!(
                "{:>6}  {:<24}  {:<11}  {:>5}  {:>4}  {}",
                record.seq,
                definition.discriminant(),
                format!("{:?}", definition.meta.state).to_lowercase(),
                retry_column(definition.meta.retry, definition.meta.retry_count),
                sent_column(&definition.kind),
                definition.meta.id
            ),
            Err(e) => format!("{:>6}  {:<24}  CORRUPT      {}", record.seq, record.kind, e),
        })
        .collect()
}

/// Receivers the relay already accepted a partly sent message for.
fn sent_column(kind: &TaskKind) -> String {
    match kind.message_already_sent_to() {
        Some(sent) => sent.len().to_string(),
        None => "-".to_string(),
    }
}

fn retry_column(retry: bool, count: u32) -> String {
    if retry {
        count.to_string()
    } else {
        "-".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use task_types::{Identity, Nonce};

    #[tokio::test]
    async fn lines_follow_sequence_order() {
        let store = testing::store().await;
        let lines = lines(&store.load_all().await.unwrap());

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("send_message"));
        assert!(lines[0].contains("pending"));
        assert!(lines[1].contains("profile_sync"));
        assert!(lines[2].contains("CORRUPT"));
    }

    #[tokio::test]
    async fn empty_store() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        assert!(run(&store).await.is_ok());
    }

    #[test]
    fn sent_column_counts_served_receivers() {
        let mut definition = testing::send_to("AAAAAAAA");
        assert_eq!(sent_column(&definition.kind), "0");

        if let TaskKind::SendMessage(task) = &mut definition.kind {
            task.message_already_sent_to
                .insert(Identity::parse("AAAAAAAA").unwrap(), Nonce::random());
        }
        assert_eq!(sent_column(&definition.kind), "1");
        assert_eq!(sent_column(&testing::profile_sync().kind), "-");
    }

    #[test]
    fn retry_column_marks_tasks_without_retry() {
        assert_eq!(retry_column(false, 0), "-");
        assert_eq!(retry_column(true, 2), "2");
    }
}
