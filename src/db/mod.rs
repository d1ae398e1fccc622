//! SQLite persistence for rules, evaluations, metric samples and users.

mod evaluations;
mod metrics;
mod rules;
pub mod schema;
mod users;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::store::{StoreError, Stores};
use schema::{split_sql_statements, SCHEMA_SQL, SCHEMA_VERSION};

pub use evaluations::SqliteEvaluationStore;
pub use metrics::SqliteMetricsSink;
pub use rules::SqliteRuleStore;
pub use users::SqliteUserDirectory;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SqliteInitError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chapter-gate")
        .join("approval.db")
}

/// Opens (creating if needed) the database at `database_url` and applies the
/// bundled schema. Accepts either a `sqlite:` URL or a plain file path.
pub async fn connect(database_url: &str) -> Result<SqlitePool, SqliteInitError> {
    let in_memory = database_url.contains(":memory:");

    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        let path = Path::new(database_url);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SqliteInitError::Io(e.to_string()))?;
        }
        format!("sqlite:{}?mode=rwc", path.display())
    };

    let mut options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| SqliteInitError::Config(e.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // Every connection to :memory: is its own database.
    let max_connections = if in_memory { 1 } else { MAX_CONNECTIONS };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);

    if version.as_deref() == Some(SCHEMA_VERSION) {
        return Ok(());
    }

    for statement in split_sql_statements(SCHEMA_SQL) {
        sqlx::query(&statement).execute(pool).await?;
    }

    sqlx::query(r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#)
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    info!(version = SCHEMA_VERSION, "sqlite schema applied");
    Ok(())
}

pub fn sqlite_stores(pool: SqlitePool) -> Stores {
    Stores {
        rules: Arc::new(SqliteRuleStore::new(pool.clone())),
        evaluations: Arc::new(SqliteEvaluationStore::new(pool.clone())),
        metrics: Arc::new(SqliteMetricsSink::new(pool.clone())),
        users: Arc::new(SqliteUserDirectory::new(pool)),
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Unique-index violations become [`StoreError::Conflict`].
pub(crate) fn map_write_error(err: sqlx::Error, context: impl FnOnce() -> String) -> StoreError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(context())
        }
        other => StoreError::Sqlx(other),
    }
}

pub(crate) fn parse_json_map(raw: &str) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    if raw.trim().is_empty() {
        return Ok(Default::default());
    }
    Ok(serde_json::from_str(raw)?)
}
