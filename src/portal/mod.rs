//! Portal clients for the upstream government data sources.
//!
//! Both portals expose a paginated search plus per-record detail endpoints.
//! The [`Portal`] trait abstracts them behind one fetch/enrich/normalize
//! surface so the ingestion pipeline stays source-agnostic. Payloads cross
//! one typed parse boundary here: raw JSON deserializes into partial structs
//! with defaulted fields, and everything past this module works with typed
//! data only.

#![allow(dead_code)]

pub mod contracts;
mod http;
pub mod rate_limit;
pub mod topics;

use std::sync::Arc;

pub use contracts::ContractsPortal;
pub use http::PortalClient;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use topics::TopicsPortal;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::Settings;
use crate::models::{CanonicalRecord, FailureKind, RecordSource};

/// Errors from portal interactions, classified for retry decisions.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// Transport failure or an unexpected HTTP status. Retryable.
    #[error("network error: {0}")]
    Network(String),
    /// Upstream throttling (429/503). Retryable after backoff.
    #[error("rate limited (HTTP {status})")]
    RateLimit { status: u16 },
    /// Response body did not match the expected shape. Fails the unit.
    #[error("parse error: {0}")]
    Parse(String),
    /// The requested resource does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
    /// Normalized row is missing a hard-required field. Record skipped.
    #[error("validation: {0}")]
    Validation(String),
}

impl PortalError {
    /// Classification used when the error becomes a FailedItem.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network(_) => FailureKind::Network,
            Self::RateLimit { .. } => FailureKind::RateLimit,
            Self::Parse(_) => FailureKind::Parse,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Validation(_) => FailureKind::Validation,
        }
    }

    /// Whether retrying the same request can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_retryable()
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Typed summary payload carried by a search stub.
#[derive(Debug, Clone)]
pub enum StubPayload {
    Contract(contracts::AwardSummary),
    Topic(topics::TopicSummary),
}

/// Typed detail payload attached during enrichment.
#[derive(Debug, Clone)]
pub enum DetailPayload {
    Contract(Box<contracts::AwardDetail>),
    Topic(Box<topics::TopicDetail>),
}

/// One search hit: the typed summary plus the identifiers needed downstream.
///
/// Ephemeral — stubs are never persisted standalone.
#[derive(Debug, Clone)]
pub struct RecordStub {
    pub source: RecordSource,
    /// Stable business identifier (topic number / generated award id).
    pub external_id: String,
    /// Identifier used in detail endpoint URLs, when the payload has one.
    pub detail_id: Option<String>,
    /// Whether this stub matches the portal's active-status filter.
    pub active: bool,
    pub payload: StubPayload,
}

/// One page of search results with the portal's pagination metadata.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub stubs: Vec<RecordStub>,
    /// Total matching records as reported by the portal, when it reports one.
    pub reported_total: Option<u64>,
    /// Has-next flag from pagination metadata, when the portal provides one.
    pub has_next: Option<bool>,
}

impl SearchPage {
    /// Whether this page ends the date's unit sequence.
    ///
    /// A short page always ends it; so does reaching the reported total or an
    /// explicit has-next=false. Inconsistent totals are tolerated because the
    /// short-page rule fires regardless.
    pub fn is_final(&self, page_size: u32, cumulative: u64) -> bool {
        if (self.stubs.len() as u32) < page_size {
            return true;
        }
        if let Some(total) = self.reported_total {
            if cumulative >= total {
                return true;
            }
        }
        self.has_next == Some(false)
    }

    /// Number of stubs matching the active-status filter.
    pub fn active_count(&self) -> usize {
        self.stubs.iter().filter(|s| s.active).count()
    }
}

/// A stub merged with its detail payload and optional sub-resources.
///
/// Any sub-fetch may be absent; absence never blocks producing the record.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub stub: RecordStub,
    /// Detail payload, absent when the portal has no detail for this record.
    pub detail: Option<DetailPayload>,
    /// Published Q&A, when advertised and fetched.
    pub questions: Option<Vec<topics::TopicQuestion>>,
    /// Sub-fetches that were skipped or failed, for the record's diagnostics.
    pub diagnostics: Vec<String>,
}

impl EnrichedRecord {
    /// Wrap a stub with no detail payload at all.
    pub fn stub_only(stub: RecordStub, note: impl Into<String>) -> Self {
        Self {
            stub,
            detail: None,
            questions: None,
            diagnostics: vec![note.into()],
        }
    }
}

/// One upstream portal: paginated search, per-record enrichment, and the
/// pure mapping into the canonical row shape.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Which source this portal feeds.
    fn source(&self) -> RecordSource;

    /// First page index in this portal's pagination scheme.
    fn first_page(&self) -> u32;

    /// Whether search sweeps apply a status filter. Only filtered sweeps use
    /// consecutive-empty-page early termination.
    fn uses_status_filter(&self) -> bool;

    /// Fetch one page of search results for a date.
    async fn search(
        &self,
        date: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, PortalError>;

    /// Fetch detail and sub-resources for one stub.
    ///
    /// Never fails for partial sub-fetch problems: those leave the field
    /// absent and append a diagnostics note. Only a failure of the primary
    /// detail fetch returns an error.
    async fn enrich(&self, stub: RecordStub) -> Result<EnrichedRecord, PortalError>;

    /// Map an enriched payload to the canonical row. Pure; `today` pins the
    /// clock-derived fields. Fails only when a hard-required key field is
    /// missing from the payload.
    fn normalize(
        &self,
        enriched: &EnrichedRecord,
        today: NaiveDate,
    ) -> Result<CanonicalRecord, PortalError>;
}

/// Construct the portal client for a source from settings.
pub fn create_portal(source: RecordSource, settings: &Settings) -> Arc<dyn Portal> {
    match source {
        RecordSource::Contracts => Arc::new(ContractsPortal::new(&settings.contracts)),
        RecordSource::Topics => Arc::new(TopicsPortal::new(&settings.topics)),
    }
}

/// Trim a payload string field, mapping blanks to `None`.
pub(crate) fn nonblank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
