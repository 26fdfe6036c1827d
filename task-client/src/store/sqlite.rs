//! SQLite task store.

use super::{unix_now, StoreError, StoredTask, TaskStore};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based task store.
///
/// Uses WAL mode so an inspecting process can read while the queue writes.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (or create) the store at `path`.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let url = path.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                seq INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(count as u64)
    }

    /// Fetch one record.
    pub async fn get(&self, seq: u64) -> Result<StoredTask, StoreError> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT seq, kind, payload, created_at FROM tasks WHERE seq = ?1",
        )
        .bind(seq as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?
        .map(StoredTask::from)
        .ok_or(StoreError::NotFound { seq })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn append(&self, seq: u64, kind: &str, payload: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (seq, kind, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(seq as i64)
        .bind(kind)
        .bind(payload)
        .bind(unix_now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn update(&self, seq: u64, payload: &[u8]) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tasks SET payload = ?1 WHERE seq = ?2")
            .bind(payload)
            .bind(seq as i64)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { seq });
        }
        Ok(())
    }

    async fn remove(&self, seq: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE seq = ?1")
            .bind(seq as i64)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<StoredTask>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT seq, kind, payload, created_at FROM tasks ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(rows.into_iter().map(StoredTask::from).collect())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tasks")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    seq: i64,
    kind: String,
    payload: Vec<u8>,
    created_at: i64,
}

impl From<TaskRow> for StoredTask {
    fn from(row: TaskRow) -> Self {
        StoredTask {
            seq: row.seq as u64,
            kind: row.kind,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_and_load_in_order() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        store.append(3, "settings_sync", b"three").await.unwrap();
        store.append(1, "profile_sync", b"one").await.unwrap();
        store.append(2, "send_message", b"two").await.unwrap();

        let records = store.load_all().await.unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(records[0].kind, "profile_sync");
        assert_eq!(records[0].payload, b"one");
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        store.append(1, "profile_sync", b"one").await.unwrap();
        let result = store.append(1, "profile_sync", b"again").await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn update_rewrites_payload() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        store.append(1, "profile_sync", b"old").await.unwrap();
        store.update(1, b"new").await.unwrap();
        assert_eq!(store.get(1).await.unwrap().payload, b"new");

        let missing = store.update(9, b"x").await;
        assert!(matches!(missing, Err(StoreError::NotFound { seq: 9 })));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        store.append(1, "profile_sync", b"a").await.unwrap();
        store.append(2, "profile_sync", b"b").await.unwrap();
        store.append(3, "profile_sync", b"c").await.unwrap();

        store.remove(2).await.unwrap();
        store.remove(2).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.db");

        {
            let store = SqliteTaskStore::new(&path).await.unwrap();
            store.append(1, "profile_sync", b"persisted").await.unwrap();
        }

        let store = SqliteTaskStore::new(&path).await.unwrap();
        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"persisted");
    }
}
