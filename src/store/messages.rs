//! MessageStore: single-table libSQL persistence for ingested emails.

use std::path::Path;

use libsql::{Connection, Database, params};
use tracing::{debug, info};

use crate::config::validate_table_name;
use crate::error::StoreError;
use crate::pipeline::types::EmailRecord;

const COLUMNS: &str = "id, sender, recipient, subject, body, receivedAt";

/// Snapshot store of the last ingested batch, keyed by provider message id.
pub struct MessageStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    table: String,
}

impl MessageStore {
    /// Open (or create) a local database file and ensure the table exists.
    pub async fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db, table).await?;
        info!(path = %path.display(), table, "Message store opened");
        Ok(store)
    }

    /// Create an in-memory store (for tests).
    pub async fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db, table).await
    }

    async fn from_database(db: Database, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table).map_err(|e| StoreError::Schema(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        let store = Self {
            db,
            conn,
            table: table.to_string(),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    /// Create the table if it does not exist yet.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id TEXT PRIMARY KEY,
                        sender TEXT,
                        recipient TEXT,
                        subject TEXT,
                        body TEXT,
                        receivedAt TEXT
                    )",
                    self.table
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Schema(format!("create table {}: {e}", self.table)))?;
        Ok(())
    }

    /// Delete every stored record. Returns the number removed.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {}", self.table), ())
            .await
            .map_err(|e| StoreError::Query(format!("clear: {e}")))?;
        debug!(removed, table = %self.table, "Message store cleared");
        Ok(removed)
    }

    /// Insert or overwrite a record by id.
    pub async fn upsert(&self, record: &EmailRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    self.table
                ),
                params![
                    record.id.as_str(),
                    record.sender.as_str(),
                    record.recipient.as_str(),
                    record.subject.as_str(),
                    record.body.as_str(),
                    record.received_at.as_str(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert {}: {e}", record.id)))?;
        debug!(id = %record.id, "Record upserted");
        Ok(())
    }

    /// Look up one record by id.
    pub async fn get(&self, id: &str) -> Result<Option<EmailRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM {} WHERE id = ?1", self.table),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get {id}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get {id}: {e}"))),
        }
    }

    /// All records in insertion order.
    pub async fn all(&self) -> Result<Vec<EmailRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM {} ORDER BY rowid", self.table),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("all: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => records.push(row_to_record(&row)?),
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("all: {e}"))),
            }
        }
        Ok(records)
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM {}", self.table), ())
            .await
            .map_err(|e| StoreError::Query(format!("count: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let n: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("count: {e}")))?;
                Ok(n.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("count: {e}"))),
        }
    }
}

/// NULL columns read back as empty strings.
fn row_to_record(row: &libsql::Row) -> Result<EmailRecord, StoreError> {
    let id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("row parse: {e}")))?;
    let text = |idx: i32| row.get::<String>(idx).unwrap_or_default();

    Ok(EmailRecord {
        id,
        sender: text(1),
        recipient: text(2),
        subject: text(3),
        body: text(4),
        received_at: text(5),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> MessageStore {
        MessageStore::open_in_memory("Emails").await.unwrap()
    }

    fn record(id: &str, subject: &str) -> EmailRecord {
        EmailRecord {
            id: id.into(),
            sender: "alice@example.com".into(),
            recipient: "bob@example.com".into(),
            subject: subject.into(),
            body: "hello".into(),
            received_at: "26/06/2024 16:00:00".into(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let store = test_store().await;
        store.upsert(&record("m1", "First")).await.unwrap();

        let fetched = store.get("m1").await.unwrap().unwrap();
        assert_eq!(fetched, record("m1", "First"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = test_store().await;
        store.upsert(&record("m1", "First")).await.unwrap();
        store.upsert(&record("m1", "Second")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("m1").await.unwrap().unwrap().subject, "Second");
    }

    #[tokio::test]
    async fn all_preserves_insertion_order() {
        let store = test_store().await;
        for id in ["c", "a", "b"] {
            store.upsert(&record(id, id)).await.unwrap();
        }
        let ids: Vec<String> = store.all().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = test_store().await;
        store.upsert(&record("m1", "x")).await.unwrap();
        store.upsert(&record("m2", "y")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn null_columns_read_as_empty() {
        let store = test_store().await;
        store
            .conn
            .execute("INSERT INTO Emails (id) VALUES ('bare')", ())
            .await
            .unwrap();
        let fetched = store.get("bare").await.unwrap().unwrap();
        assert_eq!(fetched.sender, "");
        assert_eq!(fetched.received_at, "");
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent() {
        let store = test_store().await;
        store.ensure_table().await.unwrap();
        store.ensure_table().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_table_name() {
        let result = MessageStore::open_in_memory("bad name").await;
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("emails.db");
        let store = MessageStore::open(&db_path, "Emails").await.unwrap();
        store.upsert(&record("m1", "x")).await.unwrap();
        assert!(db_path.exists());
    }
}
