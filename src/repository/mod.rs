//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! over a SQLite store. Progress state (work units, job runs, failed items)
//! and canonical records live in the same database so a crash can never
//! split them.

pub mod context;
pub mod diesel_models;
pub mod pool;

// Repositories
pub mod failed_items;
pub mod job_runs;
pub mod records;
pub mod work_units;

// Utilities
pub mod util;

// Re-export main types (may be unused in main binary but are public API)
#[allow(unused_imports)]
pub use context::DbContext;
#[allow(unused_imports)]
pub use failed_items::FailedItemRepository;
#[allow(unused_imports)]
pub use job_runs::JobRunRepository;
#[allow(unused_imports)]
pub use pool::{DbError, DbPool};
#[allow(unused_imports)]
pub use records::RecordRepository;
#[allow(unused_imports)]
pub use work_units::{UnitStats, WorkUnitRepository};

use chrono::{DateTime, NaiveDate, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Parse a date string from the database, defaulting to the epoch date on error.
pub fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}
