//! Work unit model for durable page-granular progress tracking.
//!
//! A work unit is one page of one date for one portal — the smallest piece
//! of ingestion that can be independently retried or resumed. Exactly one
//! unit exists per (source, date, page) key.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::RecordSource;

/// Processing status of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkUnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The (source, date, page) identity of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub source: RecordSource,
    pub date: NaiveDate,
    pub page: u32,
}

impl UnitKey {
    pub fn new(source: RecordSource, date: NaiveDate, page: u32) -> Self {
        Self { source, date, page }
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/p{}", self.source.as_str(), self.date, self.page)
    }
}

/// Per-unit record counts reported on completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    /// Stubs returned by the search page.
    pub found: u32,
    /// Records successfully written to storage.
    pub written: u32,
    /// Records that ended as failed items.
    pub failed: u32,
}

impl UnitCounts {
    pub fn new(found: u32, written: u32, failed: u32) -> Self {
        Self {
            found,
            written,
            failed,
        }
    }
}

/// One page of one date: the resumable unit of ingestion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Database row ID.
    pub id: i64,
    /// Unit identity.
    pub key: UnitKey,
    /// Current processing status.
    pub status: WorkUnitStatus,
    /// Record counts from the most recent attempt.
    pub counts: UnitCounts,
    /// Error detail when status is failed.
    pub error_message: Option<String>,
    /// When processing of this unit last began.
    pub started_at: Option<DateTime<Utc>>,
    /// When this unit completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Heartbeat used for stale-unit reclaim.
    pub last_activity: Option<DateTime<Utc>>,
    /// When the unit row was first created.
    pub created_at: DateTime<Utc>,
}

impl WorkUnit {
    /// Create a fresh pending unit.
    pub fn new(key: UnitKey) -> Self {
        Self {
            id: 0, // Set by database
            key,
            status: WorkUnitStatus::Pending,
            counts: UnitCounts::default(),
            error_message: None,
            started_at: None,
            completed_at: None,
            last_activity: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this unit still needs processing.
    pub fn is_incomplete(&self) -> bool {
        matches!(self.status, WorkUnitStatus::Pending | WorkUnitStatus::Failed)
    }

    /// Whether a running unit has been abandoned past `timeout`.
    pub fn is_stale(&self, timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == WorkUnitStatus::Running
            && self
                .last_activity
                .map(|at| now - at > timeout)
                .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkUnitStatus::Pending,
            WorkUnitStatus::Running,
            WorkUnitStatus::Completed,
            WorkUnitStatus::Failed,
        ] {
            assert_eq!(WorkUnitStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(WorkUnitStatus::from_str("unknown"), None);
    }

    #[test]
    fn test_unit_key_display() {
        let key = UnitKey::new(
            RecordSource::Contracts,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            2,
        );
        assert_eq!(key.to_string(), "contracts/2024-03-15/p2");
    }

    #[test]
    fn test_staleness() {
        let key = UnitKey::new(
            RecordSource::Topics,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            1,
        );
        let now = Utc::now();
        let mut unit = WorkUnit::new(key);

        // Pending units are never stale
        assert!(!unit.is_stale(chrono::Duration::minutes(5), now));

        unit.status = WorkUnitStatus::Running;
        unit.last_activity = Some(now - chrono::Duration::minutes(10));
        assert!(unit.is_stale(chrono::Duration::minutes(5), now));

        unit.last_activity = Some(now - chrono::Duration::minutes(1));
        assert!(!unit.is_stale(chrono::Duration::minutes(5), now));

        // A running unit that never heartbeat at all counts as stale
        unit.last_activity = None;
        assert!(unit.is_stale(chrono::Duration::minutes(5), now));
    }
}
