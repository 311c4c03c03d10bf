//! Provenance store collaborators.

pub mod sqlite;

pub use sqlite::SqliteDatabase;

use crate::config::DatabaseConfig;
use crate::types::DatabaseRequest;
use crate::{BotError, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Database: Send + Sync {
    /// Inserts every row whose `(bucket, path)` is not stored yet; existing
    /// rows are skipped silently. Must tolerate concurrent duplicate batches.
    async fn insert_batch_if_not_exists(
        &self,
        table: &str,
        rows: &[DatabaseRequest],
    ) -> Result<()>;
}

pub fn build_database(config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "sqlite" => Ok(Arc::new(SqliteDatabase::open(&config.path, &config.table)?)),
        other => Err(BotError::Config(format!(
            "unsupported database backend: {}",
            other
        ))),
    }
}

/// Accepts plain SQL identifiers only; the table name is spliced into SQL.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid {
        return Err(BotError::Config(format!(
            "invalid database table name '{}'",
            table
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("objects").is_ok());
        assert!(validate_table_name("_objects_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2objects").is_err());
        assert!(validate_table_name("objects; DROP TABLE x").is_err());
    }

    #[test]
    fn test_unsupported_backend() {
        let config = DatabaseConfig {
            backend: "mysql".to_string(),
            path: "unused".into(),
            table: "objects".to_string(),
        };
        assert!(matches!(build_database(&config), Err(BotError::Config(_))));
    }
}
