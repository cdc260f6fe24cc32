//! Data models for govharvest.

mod failed_item;
mod job;
mod record;
mod work_unit;

pub use failed_item::{FailedItem, FailureKind, ERROR_MESSAGE_MAX};
pub use job::{JobKind, JobLog, JobRun, JobStatus, JobTotals, TriggerSource, JOB_LOG_CAPACITY};
pub use record::{CanonicalRecord, CompositeKey, RecordSource};
pub use work_unit::{UnitCounts, UnitKey, WorkUnit, WorkUnitStatus};
