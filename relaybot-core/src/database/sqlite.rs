use super::{Database, validate_table_name};
use crate::types::DatabaseRequest;
use crate::{BotError, Result};
use async_trait::async_trait;
use rusqlite::{Connection, TransactionBehavior, params_from_iter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite builds before 3.32 cap bound parameters at 999; each row binds 4.
const MAX_ROWS_PER_STATEMENT: usize = 999 / 4;

pub struct SqliteDatabase {
    db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub bucket: String,
    pub path: String,
    pub md5sum: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SqliteDatabase {
    /// Opens the database file and creates `table` when missing.
    pub fn open(db_path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let database = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        database.init_schema(table)?;
        Ok(database)
    }

    fn get_conn(&self) -> Result<Connection> {
        open_connection(&self.db_path)
    }

    fn init_schema(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        let conn = self.get_conn()?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    bucket_name TEXT NOT NULL,
                    blob_path TEXT NOT NULL,
                    md5sum TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (bucket_name, blob_path)
                )",
                table
            ),
            [],
        )?;

        Ok(())
    }

    pub fn list_records(&self, table: &str) -> Result<Vec<ObjectRecord>> {
        validate_table_name(table)?;
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT bucket_name, blob_path, md5sum, created_at FROM {} ORDER BY id",
            table
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (bucket, path, md5sum, created_at) = row?;
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| BotError::Database(format!("invalid created_at: {}", e)))?
                .with_timezone(&chrono::Utc);
            records.push(ObjectRecord {
                bucket,
                path,
                md5sum,
                created_at,
            });
        }

        Ok(records)
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn insert_rows(db_path: &Path, table: &str, rows: &[DatabaseRequest]) -> Result<usize> {
    let mut conn = open_connection(db_path)?;
    let created_at = chrono::Utc::now().to_rfc3339();

    // Chunks of one batch commit together.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut inserted = 0;
    for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
        let placeholders = vec!["(?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT OR IGNORE INTO {} (bucket_name, blob_path, md5sum, created_at) VALUES {}",
            table, placeholders
        );

        let values = chunk.iter().flat_map(|row| {
            [
                row.bucket.as_str(),
                row.path.as_str(),
                row.content_hash.as_str(),
                created_at.as_str(),
            ]
        });

        inserted += tx.execute(&sql, params_from_iter(values))?;
    }
    tx.commit()?;

    Ok(inserted)
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn insert_batch_if_not_exists(
        &self,
        table: &str,
        rows: &[DatabaseRequest],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        validate_table_name(table)?;

        let db_path = self.db_path.clone();
        let table = table.to_string();
        let rows = rows.to_vec();
        let batch_len = rows.len();

        let inserted = tokio::task::spawn_blocking(move || insert_rows(&db_path, &table, &rows))
            .await
            .map_err(|e| BotError::Internal(format!("database task failed: {}", e)))??;

        tracing::debug!(
            "Inserted {} of {} rows ({} already present)",
            inserted,
            batch_len,
            batch_len - inserted
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(bucket: &str, path: &str, hash: &str) -> DatabaseRequest {
        DatabaseRequest {
            bucket: bucket.to_string(),
            path: path.to_string(),
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_skips_existing_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(temp_dir.path().join("bot.db"), "objects").unwrap();

        db.insert_batch_if_not_exists("objects", &[row("b", "a", "h1"), row("b", "c", "h2")])
            .await
            .unwrap();
        db.insert_batch_if_not_exists("objects", &[row("b", "a", "other"), row("b", "d", "h3")])
            .await
            .unwrap();

        let records = db.list_records("objects").unwrap();
        let keys: Vec<(&str, &str, &str)> = records
            .iter()
            .map(|r| (r.bucket.as_str(), r.path.as_str(), r.md5sum.as_str()))
            .collect();
        assert_eq!(keys, vec![("b", "a", "h1"), ("b", "c", "h2"), ("b", "d", "h3")]);
    }

    #[tokio::test]
    async fn test_same_path_in_other_bucket_is_distinct() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(temp_dir.path().join("bot.db"), "objects").unwrap();

        db.insert_batch_if_not_exists("objects", &[row("b1", "a", "h"), row("b2", "a", "h")])
            .await
            .unwrap();
        assert_eq!(db.list_records("objects").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_batches() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Arc::new(SqliteDatabase::open(temp_dir.path().join("bot.db"), "objects").unwrap());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                let rows: Vec<DatabaseRequest> =
                    (0..20).map(|i| row("b", &format!("obj/{}", i), "h")).collect();
                db.insert_batch_if_not_exists("objects", &rows).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(db.list_records("objects").unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_large_batch_spans_statements() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(temp_dir.path().join("bot.db"), "objects").unwrap();

        let mut rows: Vec<DatabaseRequest> = (0..9000)
            .map(|i| row("b", &format!("obj/{}", i), "h"))
            .collect();
        // Duplicate lands in a later statement than its first occurrence.
        rows.push(row("b", "obj/0", "other"));

        db.insert_batch_if_not_exists("objects", &rows).await.unwrap();

        let records = db.list_records("objects").unwrap();
        assert_eq!(records.len(), 9000);
        assert_eq!(records[0].path, "obj/0");
        assert_eq!(records[0].md5sum, "h");
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(SqliteDatabase::open(temp_dir.path().join("bot.db"), "bad name").is_err());

        let db = SqliteDatabase::open(temp_dir.path().join("bot.db"), "objects").unwrap();
        let result = db
            .insert_batch_if_not_exists("objects;--", &[row("b", "a", "h")])
            .await;
        assert!(matches!(result, Err(BotError::Config(_))));
    }
}
