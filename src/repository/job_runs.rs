//! Job run repository: persisted state of ingestion sweeps.
//!
//! The orchestrator flushes its in-memory run here after every state change
//! of note, so `status` and the HTTP API always read fresh progress from the
//! store rather than from the process.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::JobRunRow;
use super::pool::{DbError, DbPool};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{JobKind, JobLog, JobRun, JobStatus, JobTotals, RecordSource, TriggerSource};
use crate::schema::job_runs;
use crate::with_conn;

impl From<JobRunRow> for JobRun {
    fn from(row: JobRunRow) -> Self {
        JobRun {
            id: row.id,
            source: RecordSource::from_str(&row.source).unwrap_or(RecordSource::Contracts),
            kind: JobKind::from_str(&row.kind).unwrap_or(JobKind::Full),
            status: JobStatus::from_str(&row.status).unwrap_or(JobStatus::Pending),
            trigger: TriggerSource::from_str(&row.trigger_source).unwrap_or(TriggerSource::Cli),
            totals: JobTotals {
                found: row.found.max(0) as u64,
                processed: row.processed.max(0) as u64,
                inserted: row.inserted.max(0) as u64,
                updated: row.updated.max(0) as u64,
                unchanged: row.unchanged.max(0) as u64,
                failed: row.failed.max(0) as u64,
            },
            units_total: row.units_total.max(0) as u32,
            units_completed: row.units_completed.max(0) as u32,
            error: row.error,
            log: JobLog::from_json(&row.log),
            started_at: parse_datetime(&row.started_at),
            finished_at: parse_datetime_opt(row.finished_at),
            last_activity: parse_datetime(&row.last_activity),
        }
    }
}

/// Diesel-backed job run repository.
#[derive(Clone)]
pub struct JobRunRepository {
    pool: DbPool,
}

impl JobRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Write the full state of a run, inserting or replacing by id.
    pub async fn save(&self, run: &JobRun) -> Result<(), DbError> {
        let log = run.log.to_json();
        let started_at = run.started_at.to_rfc3339();
        let finished_at = run.finished_at.map(|dt| dt.to_rfc3339());
        let last_activity = run.last_activity.to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(job_runs::table)
                .values((
                    job_runs::id.eq(&run.id),
                    job_runs::source.eq(run.source.as_str()),
                    job_runs::kind.eq(run.kind.as_str()),
                    job_runs::status.eq(run.status.as_str()),
                    job_runs::trigger_source.eq(run.trigger.as_str()),
                    job_runs::found.eq(run.totals.found as i32),
                    job_runs::processed.eq(run.totals.processed as i32),
                    job_runs::inserted.eq(run.totals.inserted as i32),
                    job_runs::updated.eq(run.totals.updated as i32),
                    job_runs::unchanged.eq(run.totals.unchanged as i32),
                    job_runs::failed.eq(run.totals.failed as i32),
                    job_runs::units_total.eq(run.units_total as i32),
                    job_runs::units_completed.eq(run.units_completed as i32),
                    job_runs::error.eq(&run.error),
                    job_runs::log.eq(&log),
                    job_runs::started_at.eq(&started_at),
                    job_runs::finished_at.eq(&finished_at),
                    job_runs::last_activity.eq(&last_activity),
                ))
                .on_conflict(job_runs::id)
                .do_update()
                .set((
                    job_runs::status.eq(run.status.as_str()),
                    job_runs::found.eq(run.totals.found as i32),
                    job_runs::processed.eq(run.totals.processed as i32),
                    job_runs::inserted.eq(run.totals.inserted as i32),
                    job_runs::updated.eq(run.totals.updated as i32),
                    job_runs::unchanged.eq(run.totals.unchanged as i32),
                    job_runs::failed.eq(run.totals.failed as i32),
                    job_runs::units_total.eq(run.units_total as i32),
                    job_runs::units_completed.eq(run.units_completed as i32),
                    job_runs::error.eq(&run.error),
                    job_runs::log.eq(&log),
                    job_runs::finished_at.eq(&finished_at),
                    job_runs::last_activity.eq(&last_activity),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Get one run by id.
    pub async fn get(&self, id: &str) -> Result<Option<JobRun>, DbError> {
        with_conn!(self.pool, conn, {
            job_runs::table
                .filter(job_runs::id.eq(id))
                .first::<JobRunRow>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(JobRun::from))
        })
    }

    /// The most recently started run, optionally scoped to a source.
    pub async fn find_latest(&self, source: Option<RecordSource>) -> Result<Option<JobRun>, DbError> {
        let source_str = source.map(|s| s.as_str());

        with_conn!(self.pool, conn, {
            let mut query = job_runs::table
                .order(job_runs::started_at.desc())
                .into_boxed();
            if let Some(src) = source_str {
                query = query.filter(job_runs::source.eq(src));
            }
            query
                .first::<JobRunRow>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(JobRun::from))
        })
    }

    /// A live pending or running run for this source, if one exists.
    ///
    /// A run whose heartbeat is older than `stale_after` belonged to a dead
    /// process and does not count as active, so a crashed run can never block
    /// new triggers.
    pub async fn find_active(
        &self,
        source: RecordSource,
        stale_after: chrono::Duration,
    ) -> Result<Option<JobRun>, DbError> {
        let cutoff = (Utc::now() - stale_after).to_rfc3339();

        with_conn!(self.pool, conn, {
            job_runs::table
                .filter(job_runs::source.eq(source.as_str()))
                .filter(
                    job_runs::status
                        .eq(JobStatus::Pending.as_str())
                        .or(job_runs::status.eq(JobStatus::Running.as_str())),
                )
                .filter(job_runs::last_activity.ge(&cutoff))
                .order(job_runs::started_at.desc())
                .first::<JobRunRow>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(JobRun::from))
        })
    }

    /// Refresh a run's heartbeat without rewriting the rest of its state.
    pub async fn touch(&self, id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::update(job_runs::table.filter(job_runs::id.eq(id)))
                .set(job_runs::last_activity.eq(&now))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Mark stale pending/running runs as failed.
    ///
    /// Returns the number of runs closed out. Live runs are protected by
    /// their watchdog heartbeat; anything past `stale_after` was abandoned
    /// by a crashed process.
    pub async fn fail_abandoned(
        &self,
        source: RecordSource,
        stale_after: chrono::Duration,
    ) -> Result<u64, DbError> {
        let now = Utc::now().to_rfc3339();
        let cutoff = (Utc::now() - stale_after).to_rfc3339();

        with_conn!(self.pool, conn, {
            let closed = diesel::update(
                job_runs::table
                    .filter(job_runs::source.eq(source.as_str()))
                    .filter(
                        job_runs::status
                            .eq(JobStatus::Pending.as_str())
                            .or(job_runs::status.eq(JobStatus::Running.as_str())),
                    )
                    .filter(job_runs::last_activity.lt(&cutoff)),
            )
            .set((
                job_runs::status.eq(JobStatus::Failed.as_str()),
                job_runs::error.eq("abandoned: heartbeat stopped"),
                job_runs::finished_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            Ok(closed as u64)
        })
    }

    /// The most recent runs across both sources, newest first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<JobRun>, DbError> {
        with_conn!(self.pool, conn, {
            job_runs::table
                .order(job_runs::started_at.desc())
                .limit(limit as i64)
                .load::<JobRunRow>(&mut conn)
                .await
                .map(|rows| rows.into_iter().map(JobRun::from).collect())
        })
    }
}
