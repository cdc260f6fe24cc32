//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! Timestamps are stored as RFC3339 text, dates as ISO-8601 text.

use diesel::prelude::*;

use crate::schema;

/// Canonical record row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RecordRow {
    pub id: i32,
    pub source: String,
    pub external_id: String,
    pub cycle: String,
    pub title: Option<String>,
    pub code: Option<String>,
    pub status: Option<String>,
    pub organization: Option<String>,
    pub sub_organization: Option<String>,
    pub program: Option<String>,
    pub description: Option<String>,
    pub objective: Option<String>,
    pub keywords: Option<String>,
    pub technology_areas: Option<String>,
    pub contacts: Option<String>,
    pub questions: Option<String>,
    pub question_count: i32,
    pub qa_open: Option<i32>,
    pub itar_restricted: Option<i32>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,
    pub days_until_close: Option<i32>,
    pub window_status: Option<String>,
    pub urgency: Option<String>,
    pub fiscal_year: Option<i32>,
    pub amount: Option<f64>,
    pub amount_category: Option<String>,
    pub naics_code: Option<String>,
    pub uei: Option<String>,
    pub duns: Option<String>,
    pub vendor_name: Option<String>,
    pub place_of_performance: Option<String>,
    pub pdf_url: Option<String>,
    pub portal_url: Option<String>,
    pub quality_score: i32,
    pub quality_reasons: Option<String>,
    pub diagnostics: Option<String>,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub updated_at: String,
}

/// New canonical record for insertion/upsert.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::records)]
pub struct NewRecord<'a> {
    pub source: &'a str,
    pub external_id: &'a str,
    pub cycle: &'a str,
    pub title: Option<&'a str>,
    pub code: Option<&'a str>,
    pub status: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub sub_organization: Option<&'a str>,
    pub program: Option<&'a str>,
    pub description: Option<&'a str>,
    pub objective: Option<&'a str>,
    pub keywords: Option<&'a str>,
    pub technology_areas: Option<&'a str>,
    pub contacts: Option<&'a str>,
    pub questions: Option<&'a str>,
    pub question_count: i32,
    pub qa_open: Option<i32>,
    pub itar_restricted: Option<i32>,
    pub open_date: Option<&'a str>,
    pub close_date: Option<&'a str>,
    pub days_until_close: Option<i32>,
    pub window_status: Option<&'a str>,
    pub urgency: Option<&'a str>,
    pub fiscal_year: Option<i32>,
    pub amount: Option<f64>,
    pub amount_category: Option<&'a str>,
    pub naics_code: Option<&'a str>,
    pub uei: Option<&'a str>,
    pub duns: Option<&'a str>,
    pub vendor_name: Option<&'a str>,
    pub place_of_performance: Option<&'a str>,
    pub pdf_url: Option<&'a str>,
    pub portal_url: Option<&'a str>,
    pub quality_score: i32,
    pub quality_reasons: Option<&'a str>,
    pub diagnostics: Option<&'a str>,
    pub first_seen_at: &'a str,
    pub last_seen_at: &'a str,
    pub updated_at: &'a str,
}

/// Work unit row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::work_units)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkUnitRow {
    pub id: i32,
    pub source: String,
    pub date: String,
    pub page_number: i32,
    pub status: String,
    pub records_found: i32,
    pub records_written: i32,
    pub records_failed: i32,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_activity: Option<String>,
    pub created_at: String,
}

/// New work unit for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::work_units)]
pub struct NewWorkUnit<'a> {
    pub source: &'a str,
    pub date: &'a str,
    pub page_number: i32,
    pub status: &'a str,
    pub records_found: i32,
    pub records_written: i32,
    pub records_failed: i32,
    pub error_message: Option<&'a str>,
    pub started_at: Option<&'a str>,
    pub completed_at: Option<&'a str>,
    pub last_activity: Option<&'a str>,
    pub created_at: &'a str,
}

/// Failed item row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::failed_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FailedItemRow {
    pub id: i32,
    pub source: String,
    pub external_id: String,
    pub error_type: String,
    pub error_message: String,
    pub date: Option<String>,
    pub page_number: Option<i32>,
    pub attempt_count: i32,
    pub first_failed_at: String,
    pub last_attempt_at: String,
}

/// New failed item for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::failed_items)]
pub struct NewFailedItem<'a> {
    pub source: &'a str,
    pub external_id: &'a str,
    pub error_type: &'a str,
    pub error_message: &'a str,
    pub date: Option<&'a str>,
    pub page_number: Option<i32>,
    pub attempt_count: i32,
    pub first_failed_at: &'a str,
    pub last_attempt_at: &'a str,
}

/// Job run row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRunRow {
    pub id: String,
    pub source: String,
    pub kind: String,
    pub status: String,
    pub trigger_source: String,
    pub found: i32,
    pub processed: i32,
    pub inserted: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub failed: i32,
    pub units_total: i32,
    pub units_completed: i32,
    pub error: Option<String>,
    pub log: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub last_activity: String,
}

/// New job run for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::job_runs)]
pub struct NewJobRun<'a> {
    pub id: &'a str,
    pub source: &'a str,
    pub kind: &'a str,
    pub status: &'a str,
    pub trigger_source: &'a str,
    pub found: i32,
    pub processed: i32,
    pub inserted: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub failed: i32,
    pub units_total: i32,
    pub units_completed: i32,
    pub error: Option<&'a str>,
    pub log: &'a str,
    pub started_at: &'a str,
    pub finished_at: Option<&'a str>,
    pub last_activity: &'a str,
}
