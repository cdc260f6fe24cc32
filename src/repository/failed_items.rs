//! Failed item repository: the durable retry queue.
//!
//! One row per (source, external_id). Repeated failures of the same record
//! increment attempt_count in place; success deletes the row, so the table
//! always lists exactly the records still needing attention.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::FailedItemRow;
use super::pool::{DbError, DbPool};
use super::{parse_date, parse_datetime};
use crate::models::{FailedItem, FailureKind, RecordSource, UnitKey};
use crate::schema::failed_items;
use crate::with_conn;

impl From<FailedItemRow> for FailedItem {
    fn from(row: FailedItemRow) -> Self {
        FailedItem {
            id: row.id as i64,
            source: RecordSource::from_str(&row.source).unwrap_or(RecordSource::Contracts),
            external_id: row.external_id,
            kind: FailureKind::from_str(&row.error_type).unwrap_or(FailureKind::Network),
            error_message: row.error_message,
            date: row.date.as_deref().map(parse_date),
            page: row.page_number.map(|p| p as u32),
            attempt_count: row.attempt_count.max(0) as u32,
            first_failed_at: parse_datetime(&row.first_failed_at),
            last_attempt_at: parse_datetime(&row.last_attempt_at),
        }
    }
}

/// Diesel-backed failed item repository.
#[derive(Clone)]
pub struct FailedItemRepository {
    pool: DbPool,
}

impl FailedItemRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record one failure for a record, creating or bumping its row.
    ///
    /// A repeat failure increments attempt_count, refreshes the error and
    /// unit context, and leaves first_failed_at untouched.
    pub async fn record_failure(
        &self,
        source: RecordSource,
        external_id: &str,
        kind: FailureKind,
        error: &str,
        unit: Option<&UnitKey>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let message = FailedItem::truncate_message(error);
        let date = unit.map(|u| u.date.to_string());
        let page = unit.map(|u| u.page as i32);

        with_conn!(self.pool, conn, {
            diesel::insert_into(failed_items::table)
                .values((
                    failed_items::source.eq(source.as_str()),
                    failed_items::external_id.eq(external_id),
                    failed_items::error_type.eq(kind.as_str()),
                    failed_items::error_message.eq(&message),
                    failed_items::date.eq(&date),
                    failed_items::page_number.eq(page),
                    failed_items::attempt_count.eq(1),
                    failed_items::first_failed_at.eq(&now),
                    failed_items::last_attempt_at.eq(&now),
                ))
                .on_conflict((failed_items::source, failed_items::external_id))
                .do_update()
                .set((
                    failed_items::error_type.eq(kind.as_str()),
                    failed_items::error_message.eq(&message),
                    failed_items::date.eq(&date),
                    failed_items::page_number.eq(page),
                    failed_items::attempt_count.eq(failed_items::attempt_count + 1),
                    failed_items::last_attempt_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Get one failed item.
    pub async fn get(
        &self,
        source: RecordSource,
        external_id: &str,
    ) -> Result<Option<FailedItem>, DbError> {
        with_conn!(self.pool, conn, {
            failed_items::table
                .filter(failed_items::source.eq(source.as_str()))
                .filter(failed_items::external_id.eq(external_id))
                .first::<FailedItemRow>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(FailedItem::from))
        })
    }

    /// List failed items oldest attempt first, optionally scoped to a source.
    pub async fn list(&self, source: Option<RecordSource>) -> Result<Vec<FailedItem>, DbError> {
        let source_str = source.map(|s| s.as_str());

        with_conn!(self.pool, conn, {
            let mut query = failed_items::table
                .order(failed_items::last_attempt_at.asc())
                .into_boxed();
            if let Some(src) = source_str {
                query = query.filter(failed_items::source.eq(src));
            }
            query
                .load::<FailedItemRow>(&mut conn)
                .await
                .map(|rows| rows.into_iter().map(FailedItem::from).collect())
        })
    }

    /// Delete a failed item once its record has been processed successfully.
    ///
    /// Returns whether a row was actually removed.
    pub async fn delete(&self, source: RecordSource, external_id: &str) -> Result<bool, DbError> {
        with_conn!(self.pool, conn, {
            let deleted = diesel::delete(
                failed_items::table
                    .filter(failed_items::source.eq(source.as_str()))
                    .filter(failed_items::external_id.eq(external_id)),
            )
            .execute(&mut conn)
            .await?;
            Ok(deleted > 0)
        })
    }

    /// Count failed items, optionally scoped to a source.
    pub async fn count(&self, source: Option<RecordSource>) -> Result<u64, DbError> {
        use diesel::dsl::count_star;
        let source_str = source.map(|s| s.as_str());

        with_conn!(self.pool, conn, {
            let mut query = failed_items::table.select(count_star()).into_boxed();
            if let Some(src) = source_str {
                query = query.filter(failed_items::source.eq(src));
            }
            let count: i64 = query.first(&mut conn).await?;
            Ok(count as u64)
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

    fn unit_key() -> UnitKey {
        UnitKey::new(
            RecordSource::Topics,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            2,
        )
    }

    #[tokio::test]
    async fn test_repeat_failure_bumps_attempt_count() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.failed_items();
        let key = unit_key();

        repo.record_failure(
            RecordSource::Topics,
            "T-9",
            FailureKind::Network,
            "timed out",
            Some(&key),
        )
        .await
        .unwrap();

        let first = repo.get(RecordSource::Topics, "T-9").await.unwrap().unwrap();
        assert_eq!(first.attempt_count, 1);
        assert_eq!(first.kind, FailureKind::Network);
        assert_eq!(first.date, Some(key.date));
        assert_eq!(first.page, Some(2));

        repo.record_failure(
            RecordSource::Topics,
            "T-9",
            FailureKind::Persistence,
            "disk full",
            Some(&key),
        )
        .await
        .unwrap();

        let second = repo.get(RecordSource::Topics, "T-9").await.unwrap().unwrap();
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.kind, FailureKind::Persistence);
        assert_eq!(second.error_message, "disk full");
        assert_eq!(second.first_failed_at, first.first_failed_at);
        assert!(second.last_attempt_at >= first.last_attempt_at);
        assert_eq!(repo.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_on_success() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.failed_items();

        repo.record_failure(
            RecordSource::Contracts,
            "CONT-1",
            FailureKind::Parse,
            "unexpected payload shape",
            None,
        )
        .await
        .unwrap();

        assert!(repo.delete(RecordSource::Contracts, "CONT-1").await.unwrap());
        assert!(!repo.delete(RecordSource::Contracts, "CONT-1").await.unwrap());
        assert_eq!(repo.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_scoped_by_source() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.failed_items();

        repo.record_failure(
            RecordSource::Contracts,
            "CONT-1",
            FailureKind::Network,
            "reset",
            None,
        )
        .await
        .unwrap();
        repo.record_failure(
            RecordSource::Topics,
            "T-1",
            FailureKind::RateLimit,
            "429",
            None,
        )
        .await
        .unwrap();

        let topics = repo.list(Some(RecordSource::Topics)).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].external_id, "T-1");

        let all = repo.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
