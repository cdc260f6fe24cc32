//! Work unit repository: durable page-granular progress tracking.
//!
//! Every page of every swept date gets exactly one row here, keyed by
//! (source, date, page). Interrupted runs resume by listing incomplete
//! units; abandoned running units are reclaimed by heartbeat age.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use super::diesel_models::WorkUnitRow;
use super::pool::{DbError, DbPool};
use super::{parse_date, parse_datetime, parse_datetime_opt};
use crate::models::{RecordSource, UnitCounts, UnitKey, WorkUnit, WorkUnitStatus};
use crate::schema::work_units;
use crate::with_conn;

impl From<WorkUnitRow> for WorkUnit {
    fn from(row: WorkUnitRow) -> Self {
        WorkUnit {
            id: row.id as i64,
            key: UnitKey {
                source: RecordSource::from_str(&row.source).unwrap_or(RecordSource::Contracts),
                date: parse_date(&row.date),
                page: row.page_number as u32,
            },
            status: WorkUnitStatus::from_str(&row.status).unwrap_or(WorkUnitStatus::Pending),
            counts: UnitCounts {
                found: row.records_found as u32,
                written: row.records_written as u32,
                failed: row.records_failed as u32,
            },
            error_message: row.error_message,
            started_at: parse_datetime_opt(row.started_at),
            completed_at: parse_datetime_opt(row.completed_at),
            last_activity: parse_datetime_opt(row.last_activity),
            created_at: parse_datetime(&row.created_at),
        }
    }
}

/// Per-status unit counts for one source.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UnitStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl UnitStats {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }
}

/// Diesel-backed work unit repository.
#[derive(Clone)]
pub struct WorkUnitRepository {
    pool: DbPool,
}

impl WorkUnitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the unit for a key, creating a pending row if none exists.
    ///
    /// The insert is an upsert on the unique (source, date, page) index, so
    /// concurrent callers converge on the same row.
    pub async fn get_or_create(&self, key: &UnitKey) -> Result<WorkUnit, DbError> {
        let source = key.source.as_str();
        let date = key.date.to_string();
        let page = key.page as i32;
        let now = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(work_units::table)
                .values((
                    work_units::source.eq(source),
                    work_units::date.eq(&date),
                    work_units::page_number.eq(page),
                    work_units::status.eq(WorkUnitStatus::Pending.as_str()),
                    work_units::records_found.eq(0),
                    work_units::records_written.eq(0),
                    work_units::records_failed.eq(0),
                    work_units::created_at.eq(&now),
                ))
                .on_conflict((
                    work_units::source,
                    work_units::date,
                    work_units::page_number,
                ))
                .do_nothing()
                .execute(&mut conn)
                .await?;

            work_units::table
                .filter(work_units::source.eq(source))
                .filter(work_units::date.eq(&date))
                .filter(work_units::page_number.eq(page))
                .first::<WorkUnitRow>(&mut conn)
                .await
                .map(WorkUnit::from)
        })
    }

    /// Get a unit by key without creating it.
    pub async fn get(&self, key: &UnitKey) -> Result<Option<WorkUnit>, DbError> {
        let source = key.source.as_str();
        let date = key.date.to_string();
        let page = key.page as i32;

        with_conn!(self.pool, conn, {
            work_units::table
                .filter(work_units::source.eq(source))
                .filter(work_units::date.eq(&date))
                .filter(work_units::page_number.eq(page))
                .first::<WorkUnitRow>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(WorkUnit::from))
        })
    }

    /// Transition a unit to running and record the start of the attempt.
    pub async fn mark_running(&self, id: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::update(work_units::table.filter(work_units::id.eq(id as i32)))
                .set((
                    work_units::status.eq(WorkUnitStatus::Running.as_str()),
                    work_units::started_at.eq(&now),
                    work_units::last_activity.eq(&now),
                    work_units::error_message.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Refresh a running unit's heartbeat.
    pub async fn heartbeat(&self, id: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::update(work_units::table.filter(work_units::id.eq(id as i32)))
                .set(work_units::last_activity.eq(&now))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Transition a unit to completed with its final counts.
    pub async fn mark_completed(&self, id: i64, counts: &UnitCounts) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::update(work_units::table.filter(work_units::id.eq(id as i32)))
                .set((
                    work_units::status.eq(WorkUnitStatus::Completed.as_str()),
                    work_units::records_found.eq(counts.found as i32),
                    work_units::records_written.eq(counts.written as i32),
                    work_units::records_failed.eq(counts.failed as i32),
                    work_units::completed_at.eq(&now),
                    work_units::last_activity.eq(&now),
                    work_units::error_message.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Transition a unit to failed. Failed units stay eligible for resume.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let message = crate::models::FailedItem::truncate_message(error);

        with_conn!(self.pool, conn, {
            diesel::update(work_units::table.filter(work_units::id.eq(id as i32)))
                .set((
                    work_units::status.eq(WorkUnitStatus::Failed.as_str()),
                    work_units::error_message.eq(&message),
                    work_units::last_activity.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// List pending and failed units for a source, most recent date first.
    pub async fn list_incomplete(&self, source: RecordSource) -> Result<Vec<WorkUnit>, DbError> {
        with_conn!(self.pool, conn, {
            work_units::table
                .filter(work_units::source.eq(source.as_str()))
                .filter(
                    work_units::status
                        .eq(WorkUnitStatus::Pending.as_str())
                        .or(work_units::status.eq(WorkUnitStatus::Failed.as_str())),
                )
                .order((work_units::date.desc(), work_units::page_number.asc()))
                .load::<WorkUnitRow>(&mut conn)
                .await
                .map(|rows| rows.into_iter().map(WorkUnit::from).collect())
        })
    }

    /// Reset running units whose heartbeat is older than `stale_after`.
    ///
    /// Returns the number of units reclaimed. The status check is part of the
    /// WHERE clause so a unit that completed between listing and update is
    /// left alone.
    pub async fn reclaim_stale(
        &self,
        source: RecordSource,
        stale_after: chrono::Duration,
    ) -> Result<u64, DbError> {
        let cutoff = (Utc::now() - stale_after).to_rfc3339();

        with_conn!(self.pool, conn, {
            let reclaimed = diesel::update(
                work_units::table
                    .filter(work_units::source.eq(source.as_str()))
                    .filter(work_units::status.eq(WorkUnitStatus::Running.as_str()))
                    .filter(
                        work_units::last_activity
                            .lt(&cutoff)
                            .or(work_units::last_activity.is_null()),
                    ),
            )
            .set((
                work_units::status.eq(WorkUnitStatus::Pending.as_str()),
                work_units::error_message.eq("stale unit reclaimed"),
            ))
            .execute(&mut conn)
            .await?;
            Ok(reclaimed as u64)
        })
    }

    /// Per-status counts, optionally scoped to one source.
    pub async fn stats(&self, source: Option<RecordSource>) -> Result<UnitStats, DbError> {
        use diesel::dsl::count_star;
        let source_str = source.map(|s| s.as_str());

        with_conn!(self.pool, conn, {
            let mut stats = UnitStats::default();
            for status in [
                WorkUnitStatus::Pending,
                WorkUnitStatus::Running,
                WorkUnitStatus::Completed,
                WorkUnitStatus::Failed,
            ] {
                let mut query = work_units::table
                    .filter(work_units::status.eq(status.as_str()))
                    .select(count_star())
                    .into_boxed();
                if let Some(src) = source_str {
                    query = query.filter(work_units::source.eq(src));
                }
                let count: i64 = query.first(&mut conn).await?;
                let count = count as u64;
                match status {
                    WorkUnitStatus::Pending => stats.pending = count,
                    WorkUnitStatus::Running => stats.running = count,
                    WorkUnitStatus::Completed => stats.completed = count,
                    WorkUnitStatus::Failed => stats.failed = count,
                }
            }
            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::context::DbContext;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    async fn setup() -> (DbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    fn key(page: u32) -> UnitKey {
        UnitKey::new(
            RecordSource::Contracts,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            page,
        )
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_row() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.work_units();

        let first = repo.get_or_create(&key(1)).await.unwrap();
        let second = repo.get_or_create(&key(1)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, WorkUnitStatus::Pending);
        assert_eq!(repo.stats(None).await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.work_units();

        let unit = repo.get_or_create(&key(1)).await.unwrap();
        repo.mark_running(unit.id).await.unwrap();

        let running = repo.get(&key(1)).await.unwrap().unwrap();
        assert_eq!(running.status, WorkUnitStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.last_activity.is_some());

        repo.mark_completed(unit.id, &UnitCounts::new(25, 24, 1))
            .await
            .unwrap();
        let done = repo.get(&key(1)).await.unwrap().unwrap();
        assert_eq!(done.status, WorkUnitStatus::Completed);
        assert_eq!(done.counts, UnitCounts::new(25, 24, 1));
        assert!(done.completed_at.is_some());
        assert!(!done.is_incomplete());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_unit_incomplete() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.work_units();

        let unit = repo.get_or_create(&key(2)).await.unwrap();
        repo.mark_running(unit.id).await.unwrap();
        repo.mark_failed(unit.id, "connection reset").await.unwrap();

        let failed = repo.get(&key(2)).await.unwrap().unwrap();
        assert_eq!(failed.status, WorkUnitStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("connection reset"));
        assert!(failed.is_incomplete());

        let incomplete = repo.list_incomplete(RecordSource::Contracts).await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, unit.id);
    }

    #[tokio::test]
    async fn test_list_incomplete_orders_recent_dates_first() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.work_units();

        let old = UnitKey::new(
            RecordSource::Contracts,
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            1,
        );
        let recent_p2 = UnitKey::new(
            RecordSource::Contracts,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            2,
        );
        let recent_p1 = UnitKey::new(
            RecordSource::Contracts,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            1,
        );
        repo.get_or_create(&old).await.unwrap();
        repo.get_or_create(&recent_p2).await.unwrap();
        repo.get_or_create(&recent_p1).await.unwrap();

        // A completed unit must not show up as incomplete
        let done = repo.get_or_create(&recent_p1).await.unwrap();
        repo.mark_completed(done.id, &UnitCounts::default())
            .await
            .unwrap();

        let incomplete = repo.list_incomplete(RecordSource::Contracts).await.unwrap();
        let keys: Vec<UnitKey> = incomplete.iter().map(|u| u.key).collect();
        assert_eq!(keys, vec![recent_p2, old]);
    }

    #[tokio::test]
    async fn test_reclaim_stale_resets_only_stale_running_units() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.work_units();

        let stale = repo.get_or_create(&key(1)).await.unwrap();
        let fresh = repo.get_or_create(&key(2)).await.unwrap();
        repo.mark_running(stale.id).await.unwrap();
        repo.mark_running(fresh.id).await.unwrap();

        // Every running unit is fresh right after mark_running
        let reclaimed = repo
            .reclaim_stale(RecordSource::Contracts, chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed, 0);

        // A zero-length timeout makes every running unit stale
        let reclaimed = repo
            .reclaim_stale(RecordSource::Contracts, chrono::Duration::seconds(0))
            .await
            .unwrap();
        assert_eq!(reclaimed, 2);

        let unit = repo.get(&key(1)).await.unwrap().unwrap();
        assert_eq!(unit.status, WorkUnitStatus::Pending);
        assert_eq!(unit.error_message.as_deref(), Some("stale unit reclaimed"));

        // Completed units are never reclaimed
        repo.mark_running(fresh.id).await.unwrap();
        repo.mark_completed(stale.id, &UnitCounts::default())
            .await
            .unwrap();
        let reclaimed = repo
            .reclaim_stale(RecordSource::Contracts, chrono::Duration::seconds(0))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);
    }
}
