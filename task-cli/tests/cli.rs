//! End-to-end runs of the taskq binary against a store on disk.

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use task_client::{SqliteTaskStore, TaskStore};
use task_core::{encode_task, message_type, SendMessageTask, TaskDefinition, TaskKind};
use task_types::{Identity, MessageId, Receiver};

fn send_to(receiver: &str) -> TaskDefinition {
    TaskDefinition::new(TaskKind::SendMessage(SendMessageTask {
        message_id: MessageId::random(),
        receiver: Receiver::Contact(Identity::parse(receiver).unwrap()),
        to_members: vec![],
        message_type: message_type::TEXT,
        body: b"hello".to_vec(),
        created_at: 1_705_000_000_000,
        requires_blob: false,
        blob_id: None,
        message_already_sent_to: BTreeMap::new(),
    }))
}

async fn seed(path: &Path, corrupt: bool) {
    let store = SqliteTaskStore::new(path).await.unwrap();
    for (seq, receiver) in [(1, "AAAAAAAA"), (2, "BBBBBBBB")] {
        let definition = send_to(receiver);
        store
            .append(seq, definition.discriminant(), &encode_task(&definition).unwrap())
            .await
            .unwrap();
    }
    if corrupt {
        store.append(3, "send_message", b"garbage").await.unwrap();
    }
}

fn taskq(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("taskq").unwrap();
    cmd.arg("--store").arg(store);
    cmd
}

#[tokio::test]
async fn list_shows_pending_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    seed(&path, false).await;

    taskq(&path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("send_message"))
        .stdout(predicate::str::contains("2 task(s)"));
}

#[tokio::test]
async fn show_prints_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    seed(&path, false).await;

    taskq(&path)
        .args(["show", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"BBBBBBBB\""));

    taskq(&path)
        .args(["show", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[tokio::test]
async fn verify_then_purge_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    seed(&path, true).await;

    taskq(&path)
        .arg("verify")
        .assert()
        .failure()
        .stdout(predicate::str::contains("CORRUPT 3"));

    taskq(&path)
        .args(["purge", "--corrupt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 record(s)"));

    taskq(&path)
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 record(s), 2 valid, 0 corrupt"));
}

#[tokio::test]
async fn purge_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    seed(&path, true).await;

    taskq(&path)
        .arg("purge")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 3 record(s)"));

    taskq(&path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending tasks"));
}

#[test]
fn missing_config_file_fails() {
    Command::cargo_bin("taskq")
        .unwrap()
        .args(["--config", "/nonexistent/relaytask.toml", "list"])
        .assert()
        .failure();
}

#[test]
fn seq_and_corrupt_conflict() {
    let dir = tempfile::tempdir().unwrap();
    taskq(&dir.path().join("tasks.db"))
        .args(["purge", "--seq", "1", "--corrupt"])
        .assert()
        .failure();
}
