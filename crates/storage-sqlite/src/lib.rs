//! SQLite backend for [`SyncStore`](customs_sync_storage::SyncStore).
//!
//! Built on an `sqlx` pool. Uniqueness invariants (`operation_locks.scope_key`,
//! `exchange_rates(date, currency_code)`, `declarations(company_id, customs_id)`)
//! are enforced by the schema, not by application checks, so a second process
//! sharing the database file sees the same lock semantics.

mod convert;
mod schema;
mod store;

use std::str::FromStr;
use std::time::Duration;

use customs_sync_storage::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::convert::backend;

/// `SyncStore` over a SQLite database.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`, e.g.
    /// `sqlite://customs-sync.db`, and bootstrap the schema.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        // SQLite permits limited write concurrency; a single connection
        // serializes writers inside this process.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.bootstrap().await?;
        tracing::debug!(url, "sqlite store ready");
        Ok(store)
    }

    /// A private in-memory database. The single connection is pinned so the
    /// data lives as long as the store.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(backend)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn bootstrap(&self) -> Result<(), StorageError> {
        sqlx::query(schema::SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
