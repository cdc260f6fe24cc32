//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and provides access to all repositories.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::failed_items::FailedItemRepository;
use super::job_runs::JobRunRepository;
use super::pool::{DbError, DbPool};
use super::records::RecordRepository;
use super::work_units::WorkUnitRepository;

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::new(&data_dir.join("govharvest.db"));
/// ctx.init_schema().await?;
/// let units = ctx.work_units().list_incomplete(RecordSource::Contracts).await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database file path.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::sqlite_from_path(db_path),
        }
    }

    /// Create a context from a database URL (file path or `sqlite:` URL).
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        Ok(Self {
            pool: DbPool::from_url(url)?,
        })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get a canonical record repository.
    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(self.pool.clone())
    }

    /// Get a work unit repository.
    pub fn work_units(&self) -> WorkUnitRepository {
        WorkUnitRepository::new(self.pool.clone())
    }

    /// Get a failed item repository.
    pub fn failed_items(&self) -> FailedItemRepository {
        FailedItemRepository::new(self.pool.clone())
    }

    /// Get a job run repository.
    pub fn job_runs(&self) -> JobRunRepository {
        JobRunRepository::new(self.pool.clone())
    }

    /// Initialize database schema.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        crate::with_conn!(self.pool, conn, {
            conn.batch_execute(include_str!("schema_sqlite.sql")).await
        })
    }
}
