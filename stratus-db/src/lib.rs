//! # Stratus DB
//!
//! The metadata store: a SQLite database (via `sqlx`) holding every
//! control-plane entity, plus one repository module per entity family.
//!
//! Repositories own the SQL; services own the transactions. Every
//! repository function takes `&mut SqliteConnection`, so a service can run
//! several of them inside one transaction and commit or roll back as a
//! unit. SQLite's single-writer locking provides the serializable
//! isolation the cross-row invariants (bucket-name uniqueness, subnet
//! overlap, IP allocation, policy CAS) rely on; writers that collide see
//! a busy/unique error mapped to a retryable kind.

pub mod error;
pub mod model;
pub mod repo;
pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use stratus_core::Result;

use crate::error::db_err;

/// Handle to the metadata store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `url` and apply the
    /// schema. In-memory databases get a single-connection pool so every
    /// handle sees the same data.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let max_connections = if in_memory { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let db = Self { pool };
        schema::apply(&db.pool).await?;
        tracing::debug!(url, in_memory, "metadata store ready");
        Ok(db)
    }

    /// An in-memory store with the schema applied. For tests.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction. Commit through the returned guard; dropping it
    /// rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(db_err)
    }
}
