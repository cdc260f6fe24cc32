//! Canonical record repository: atomic upserts keyed by (external_id, cycle).
//!
//! Writes always go through the ON CONFLICT upsert so a re-run can never
//! duplicate a record. first_seen_at survives updates; everything else is
//! replaced by the incoming row.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::diesel_models::{NewRecord, RecordRow};
use super::pool::{DbError, DbPool};
use crate::models::{CanonicalRecord, CompositeKey, RecordSource};
use crate::normalize::{AmountCategory, UrgencyTier, WindowStatus};
use crate::quality::ScoredRecord;
use crate::schema::records;
use crate::with_conn;

impl From<RecordRow> for CanonicalRecord {
    fn from(row: RecordRow) -> Self {
        CanonicalRecord {
            source: RecordSource::from_str(&row.source).unwrap_or(RecordSource::Contracts),
            external_id: row.external_id,
            cycle: row.cycle,
            title: row.title,
            code: row.code,
            status: row.status,
            organization: row.organization,
            sub_organization: row.sub_organization,
            program: row.program,
            description: row.description,
            objective: row.objective,
            keywords: row.keywords,
            technology_areas: row.technology_areas,
            contacts: row.contacts,
            questions: row.questions,
            question_count: row.question_count.max(0) as u32,
            qa_open: row.qa_open.map(|v| v != 0),
            itar_restricted: row.itar_restricted.map(|v| v != 0),
            open_date: row.open_date.as_deref().and_then(parse_iso_date),
            close_date: row.close_date.as_deref().and_then(parse_iso_date),
            days_until_close: row.days_until_close.map(|d| d as i64),
            window_status: row.window_status.as_deref().and_then(WindowStatus::from_str),
            urgency: row.urgency.as_deref().and_then(UrgencyTier::from_str),
            fiscal_year: row.fiscal_year,
            amount: row.amount,
            amount_category: row
                .amount_category
                .as_deref()
                .and_then(AmountCategory::from_str),
            naics_code: row.naics_code,
            uei: row.uei,
            duns: row.duns,
            vendor_name: row.vendor_name,
            place_of_performance: row.place_of_performance,
            pdf_url: row.pdf_url,
            portal_url: row.portal_url,
            diagnostics: row
                .diagnostics
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok())
                .unwrap_or_default(),
        }
    }
}

fn parse_iso_date(s: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Owned string forms of one scored record, staged so the borrowed
/// [`NewRecord`] rows for a whole chunk can be built in one pass.
struct StagedRecord {
    open_date: Option<String>,
    close_date: Option<String>,
    quality_reasons: Option<String>,
    diagnostics: Option<String>,
}

impl StagedRecord {
    fn from_scored(scored: &ScoredRecord) -> Self {
        let record = &scored.record;
        Self {
            open_date: record.open_date.map(|d| d.to_string()),
            close_date: record.close_date.map(|d| d.to_string()),
            quality_reasons: if scored.quality.reasons.is_empty() {
                None
            } else {
                serde_json::to_string(&scored.quality.reasons).ok()
            },
            diagnostics: if record.diagnostics.is_empty() {
                None
            } else {
                serde_json::to_string(&record.diagnostics).ok()
            },
        }
    }
}

fn new_record<'a>(scored: &'a ScoredRecord, stage: &'a StagedRecord, now: &'a str) -> NewRecord<'a> {
    let record = &scored.record;
    NewRecord {
        source: record.source.as_str(),
        external_id: &record.external_id,
        cycle: &record.cycle,
        title: record.title.as_deref(),
        code: record.code.as_deref(),
        status: record.status.as_deref(),
        organization: record.organization.as_deref(),
        sub_organization: record.sub_organization.as_deref(),
        program: record.program.as_deref(),
        description: record.description.as_deref(),
        objective: record.objective.as_deref(),
        keywords: record.keywords.as_deref(),
        technology_areas: record.technology_areas.as_deref(),
        contacts: record.contacts.as_deref(),
        questions: record.questions.as_deref(),
        question_count: record.question_count as i32,
        qa_open: record.qa_open.map(i32::from),
        itar_restricted: record.itar_restricted.map(i32::from),
        open_date: stage.open_date.as_deref(),
        close_date: stage.close_date.as_deref(),
        days_until_close: record.days_until_close.map(|d| d as i32),
        window_status: record.window_status.map(|w| w.as_str()),
        urgency: record.urgency.map(|u| u.as_str()),
        fiscal_year: record.fiscal_year,
        amount: record.amount,
        amount_category: record.amount_category.map(|c| c.as_str()),
        naics_code: record.naics_code.as_deref(),
        uei: record.uei.as_deref(),
        duns: record.duns.as_deref(),
        vendor_name: record.vendor_name.as_deref(),
        place_of_performance: record.place_of_performance.as_deref(),
        pdf_url: record.pdf_url.as_deref(),
        portal_url: record.portal_url.as_deref(),
        quality_score: scored.quality.score,
        quality_reasons: stage.quality_reasons.as_deref(),
        diagnostics: stage.diagnostics.as_deref(),
        first_seen_at: now,
        last_seen_at: now,
        updated_at: now,
    }
}

/// Diesel-backed canonical record repository.
#[derive(Clone)]
pub struct RecordRepository {
    pool: DbPool,
}

impl RecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load existing records matching any of the given keys.
    ///
    /// Used by the writer to classify each incoming row as insert, update,
    /// or unchanged before the upsert executes.
    pub async fn find_by_keys(
        &self,
        keys: &[CompositeKey],
    ) -> Result<HashMap<CompositeKey, CanonicalRecord>, DbError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<&str> = keys.iter().map(|k| k.external_id.as_str()).collect();

        with_conn!(self.pool, conn, {
            let rows = records::table
                .filter(records::external_id.eq_any(ids))
                .load::<RecordRow>(&mut conn)
                .await?;

            Ok(rows
                .into_iter()
                .map(CanonicalRecord::from)
                .map(|r| (r.key(), r))
                .collect())
        })
    }

    /// Get one record by key.
    pub async fn get(&self, key: &CompositeKey) -> Result<Option<CanonicalRecord>, DbError> {
        with_conn!(self.pool, conn, {
            records::table
                .filter(records::external_id.eq(&key.external_id))
                .filter(records::cycle.eq(&key.cycle))
                .first::<RecordRow>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(CanonicalRecord::from))
        })
    }

    /// Upsert a chunk of scored records in one transaction.
    ///
    /// Diesel cannot express a multi-row VALUES upsert on SQLite, so the
    /// chunk is written as one row statement per record inside a single
    /// transaction; the chunk still lands or fails as a whole.
    ///
    /// On conflict every content column is replaced by the incoming row;
    /// first_seen_at keeps its original value.
    pub async fn upsert_chunk(&self, chunk: &[ScoredRecord]) -> Result<(), DbError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let staged: Vec<StagedRecord> = chunk.iter().map(StagedRecord::from_scored).collect();
        let rows: Vec<NewRecord> = chunk
            .iter()
            .zip(staged.iter())
            .map(|(scored, stage)| new_record(scored, stage, &now))
            .collect();

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                async move {
                    for row in &rows {
                        diesel::insert_into(records::table)
                            .values(row)
                            .on_conflict((records::external_id, records::cycle))
                            .do_update()
                            .set((
                                records::title.eq(excluded(records::title)),
                                records::code.eq(excluded(records::code)),
                                records::status.eq(excluded(records::status)),
                                records::organization.eq(excluded(records::organization)),
                                records::sub_organization.eq(excluded(records::sub_organization)),
                                records::program.eq(excluded(records::program)),
                                records::description.eq(excluded(records::description)),
                                records::objective.eq(excluded(records::objective)),
                                records::keywords.eq(excluded(records::keywords)),
                                records::technology_areas.eq(excluded(records::technology_areas)),
                                records::contacts.eq(excluded(records::contacts)),
                                records::questions.eq(excluded(records::questions)),
                                records::question_count.eq(excluded(records::question_count)),
                                records::qa_open.eq(excluded(records::qa_open)),
                                records::itar_restricted.eq(excluded(records::itar_restricted)),
                                records::open_date.eq(excluded(records::open_date)),
                                records::close_date.eq(excluded(records::close_date)),
                                records::days_until_close.eq(excluded(records::days_until_close)),
                                records::window_status.eq(excluded(records::window_status)),
                                records::urgency.eq(excluded(records::urgency)),
                                records::fiscal_year.eq(excluded(records::fiscal_year)),
                                records::amount.eq(excluded(records::amount)),
                                records::amount_category.eq(excluded(records::amount_category)),
                                records::naics_code.eq(excluded(records::naics_code)),
                                records::uei.eq(excluded(records::uei)),
                                records::duns.eq(excluded(records::duns)),
                                records::vendor_name.eq(excluded(records::vendor_name)),
                                records::place_of_performance
                                    .eq(excluded(records::place_of_performance)),
                                records::pdf_url.eq(excluded(records::pdf_url)),
                                records::portal_url.eq(excluded(records::portal_url)),
                                records::quality_score.eq(excluded(records::quality_score)),
                                records::quality_reasons.eq(excluded(records::quality_reasons)),
                                records::diagnostics.eq(excluded(records::diagnostics)),
                                records::last_seen_at.eq(excluded(records::last_seen_at)),
                                records::updated_at.eq(excluded(records::updated_at)),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await
        })
    }

    /// Upsert a single record. Used by the row-level fallback and retry pass.
    pub async fn upsert_one(&self, scored: &ScoredRecord) -> Result<(), DbError> {
        self.upsert_chunk(std::slice::from_ref(scored)).await
    }

    /// Count stored records, optionally scoped to one source.
    pub async fn count(&self, source: Option<RecordSource>) -> Result<u64, DbError> {
        use diesel::dsl::count_star;
        let source_str = source.map(|s| s.as_str());

        with_conn!(self.pool, conn, {
            let mut query = records::table.select(count_star()).into_boxed();
            if let Some(src) = source_str {
                query = query.filter(records::source.eq(src));
            }
            let count: i64 = query.first(&mut conn).await?;
            Ok(count as u64)
        })
    }

    /// Mean stored quality score, optionally scoped to one source.
    pub async fn average_quality(&self, source: Option<RecordSource>) -> Result<Option<f64>, DbError> {
        use diesel::dsl::count_star;
        use diesel::dsl::sum;
        let source_str = source.map(|s| s.as_str());

        with_conn!(self.pool, conn, {
            let mut query = records::table
                .select((count_star(), sum(records::quality_score)))
                .into_boxed();
            if let Some(src) = source_str {
                query = query.filter(records::source.eq(src));
            }
            let (count, total): (i64, Option<i64>) = query.first(&mut conn).await?;
            if count == 0 {
                return Ok(None);
            }
            Ok(total.map(|t| t as f64 / count as f64))
        })
    }
}
