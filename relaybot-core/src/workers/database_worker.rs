use super::{claim_batches, idle_or_shutdown};
use crate::config::DatabaseWorkerConfig;
use crate::database::Database;
use crate::pool::DatabaseRequestPool;
use crate::storage::compute_md5;
use crate::types::DatabaseRequest;
use crate::{BotError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseRoundReport {
    pub batches: usize,
    pub claimed: usize,
    pub failed_batches: usize,
}

/// Drains the database request pool with one dedup insert per batch.
pub struct DatabaseWorker {
    max_workers: usize,
    batch_size: usize,
    idle_interval: Duration,
    timeout: Duration,
    table: String,
    pool: Arc<DatabaseRequestPool>,
    database: Arc<dyn Database>,
}

/// Log correlation id: md5 of the batch's requests in claim order.
pub fn batch_id(batch: &[DatabaseRequest]) -> String {
    let serialized: String = batch.iter().map(ToString::to_string).collect();
    compute_md5(serialized.as_bytes())
}

impl DatabaseWorker {
    pub fn new(
        config: &DatabaseWorkerConfig,
        pool: Arc<DatabaseRequestPool>,
        database: Arc<dyn Database>,
    ) -> Self {
        Self {
            max_workers: config.max_workers,
            batch_size: config.batch_size,
            idle_interval: config.idle_interval(),
            timeout: config.timeout(),
            table: config.database.table.clone(),
            pool,
            database,
        }
    }

    async fn insert_batch(&self, batch: &[DatabaseRequest]) -> Result<()> {
        tokio::time::timeout(
            self.timeout,
            self.database.insert_batch_if_not_exists(&self.table, batch),
        )
        .await
        .map_err(|_| BotError::Timeout(format!("database insert exceeded {:?}", self.timeout)))?
    }

    pub async fn run_round(self: &Arc<Self>) -> DatabaseRoundReport {
        let batches = claim_batches(&self.pool, self.max_workers, self.batch_size);
        let mut report = DatabaseRoundReport {
            batches: batches.len(),
            claimed: batches.iter().map(Vec::len).sum(),
            failed_batches: 0,
        };
        if batches.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for batch in batches {
            let worker = self.clone();
            tasks.spawn(async move {
                let id = batch_id(&batch);
                match worker.insert_batch(&batch).await {
                    Ok(()) => {
                        tracing::info!("Inserted batch {} ({} requests)", id, batch.len());
                        true
                    }
                    Err(e) => {
                        // Rows are dropped; duplicates arriving later are absorbed by the dedup insert.
                        tracing::error!(
                            "Failed to insert batch {} ({} requests): {}",
                            id,
                            batch.len(),
                            e
                        );
                        false
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => report.failed_batches += 1,
                Err(e) => {
                    tracing::error!("Database batch task failed: {}", e);
                    report.failed_batches += 1;
                }
            }
        }

        report
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Database worker started: {} workers x {} requests per round into {}",
            self.max_workers,
            self.batch_size,
            self.table
        );

        while !*shutdown.borrow() {
            let report = self.run_round().await;
            if report.claimed == 0 && idle_or_shutdown(self.idle_interval, &mut shutdown).await {
                break;
            }
        }

        tracing::info!("Database worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use async_trait::async_trait;

    fn config(max_workers: usize, batch_size: usize, path: &std::path::Path) -> DatabaseWorkerConfig {
        serde_json::from_value(serde_json::json!({
            "max_workers": max_workers,
            "batch_size": batch_size,
            "database": {"path": path, "table": "objects"},
        }))
        .unwrap()
    }

    fn request(path: &str) -> DatabaseRequest {
        DatabaseRequest {
            bucket: "serving".to_string(),
            path: path.to_string(),
            content_hash: "8d777f385d3dfec8815d20f7496026dc".to_string(),
        }
    }

    #[test]
    fn test_batch_id_depends_on_content() {
        let a = batch_id(&[request("a"), request("b")]);
        assert_eq!(a, batch_id(&[request("a"), request("b")]));
        assert_ne!(a, batch_id(&[request("b"), request("a")]));
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_round_inserts_claimed_batches() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("bot.db");
        let database = Arc::new(SqliteDatabase::open(&db_path, "objects").unwrap());
        let pool = Arc::new(DatabaseRequestPool::new());
        for i in 0..7 {
            pool.add(request(&format!("obj/{}", i)));
        }

        let worker = Arc::new(DatabaseWorker::new(
            &config(2, 2, &db_path),
            pool.clone(),
            database.clone(),
        ));

        let report = worker.run_round().await;
        assert_eq!(report.batches, 2);
        assert_eq!(report.claimed, 4);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(pool.len(), 3);

        worker.run_round().await;
        assert!(pool.is_empty());
        assert_eq!(database.list_records("objects").unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_duplicate_requests_yield_one_row() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("bot.db");
        let database = Arc::new(SqliteDatabase::open(&db_path, "objects").unwrap());
        let pool = Arc::new(DatabaseRequestPool::new());
        let worker = Arc::new(DatabaseWorker::new(
            &config(1, 10, &db_path),
            pool.clone(),
            database.clone(),
        ));

        pool.add(request("obj/1"));
        worker.run_round().await;
        pool.add(request("obj/1"));
        let report = worker.run_round().await;

        assert_eq!(report.failed_batches, 0);
        assert_eq!(database.list_records("objects").unwrap().len(), 1);
    }

    struct BrokenDatabase;

    #[async_trait]
    impl Database for BrokenDatabase {
        async fn insert_batch_if_not_exists(
            &self,
            _table: &str,
            _rows: &[DatabaseRequest],
        ) -> Result<()> {
            Err(BotError::Database("disk I/O error".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(DatabaseRequestPool::new());
        pool.add(request("obj/1"));

        let worker = Arc::new(DatabaseWorker::new(
            &config(1, 10, &temp_dir.path().join("unused.db")),
            pool.clone(),
            Arc::new(BrokenDatabase),
        ));

        let report = worker.run_round().await;
        assert_eq!(report.failed_batches, 1);
        assert!(pool.is_empty());
    }
}
