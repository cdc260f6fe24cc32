//! Job run model: the top-level descriptor of one ingestion sweep.
//!
//! A JobRun is persisted, never held as authoritative in-memory state, so
//! any process can observe or resume a run by reading the store.

#![allow(dead_code)]

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RecordSource;

/// Maximum log lines retained on a job run.
pub const JOB_LOG_CAPACITY: usize = 1000;

/// Lifecycle status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What span of dates a run sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Sweep the full configured historical range.
    Full,
    /// Sweep only the trailing few days (cheap scheduled top-up).
    Recent,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Recent => "recent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }
}

/// Who started a run, recorded for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Started by the command line.
    Cli,
    /// Started by the scheduled HTTP trigger.
    Scheduled,
    /// Started by a manual HTTP request.
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cli" => Some(Self::Cli),
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTotals {
    /// Stubs seen across all search pages.
    pub found: u64,
    /// Records that survived enrichment and normalization.
    pub processed: u64,
    /// New rows created.
    pub inserted: u64,
    /// Existing rows with meaningful changes.
    pub updated: u64,
    /// Existing rows with no meaningful changes.
    pub unchanged: u64,
    /// Records that ended as failed items.
    pub failed: u64,
}

impl JobTotals {
    /// Fold another set of counters into this one.
    pub fn absorb(&mut self, other: &JobTotals) {
        self.found += other.found;
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Bounded ring buffer of timestamped log lines, persisted with the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobLog {
    lines: VecDeque<String>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamped line, evicting the oldest past capacity.
    pub fn push(&mut self, message: impl AsRef<str>) {
        if self.lines.len() >= JOB_LOG_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(format!(
            "[{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        ));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The most recent `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Serialize to the JSON array stored on the job_runs row.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.lines).unwrap_or_else(|_| "[]".to_string())
    }

    /// Restore from the stored JSON array, tolerating corrupt data.
    pub fn from_json(s: &str) -> Self {
        let lines: VecDeque<String> = serde_json::from_str(s).unwrap_or_default();
        Self { lines }
    }
}

/// One ingestion sweep over a portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Run identifier.
    pub id: String,
    /// Which portal this run sweeps.
    pub source: RecordSource,
    /// Full sweep or recent top-up.
    pub kind: JobKind,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Who started the run.
    pub trigger: TriggerSource,
    /// Aggregate counters.
    pub totals: JobTotals,
    /// Units enumerated for this run.
    pub units_total: u32,
    /// Units completed so far.
    pub units_completed: u32,
    /// Fatal error when status is failed.
    pub error: Option<String>,
    /// Bounded run log.
    pub log: JobLog,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Heartbeat for stale-run detection.
    pub last_activity: DateTime<Utc>,
}

impl JobRun {
    /// Create a new pending run.
    pub fn new(source: RecordSource, kind: JobKind, trigger: TriggerSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            kind,
            status: JobStatus::Pending,
            trigger,
            totals: JobTotals::default(),
            units_total: 0,
            units_completed: 0,
            error: None,
            log: JobLog::new(),
            started_at: now,
            finished_at: None,
            last_activity: now,
        }
    }

    /// Percentage of enumerated units completed.
    pub fn progress_percent(&self) -> u8 {
        if self.units_total == 0 {
            return 0;
        }
        ((self.units_completed as f64 / self.units_total as f64) * 100.0).round() as u8
    }

    /// Wall-clock duration so far (or total, once finished).
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
