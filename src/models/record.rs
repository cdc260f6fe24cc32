//! Canonical record model shared by both upstream portals.
//!
//! Every portal payload, however nested, normalizes into this flat shape.
//! The composite key (external_id, cycle) is the upsert identity and is
//! derived from stable upstream fields only.

#![allow(dead_code)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::normalize::{AmountCategory, UrgencyTier, WindowStatus};

/// Which upstream portal a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Procurement contract awards portal.
    Contracts,
    /// Research solicitation topics portal.
    Topics,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contracts => "contracts",
            Self::Topics => "topics",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "contracts" => Some(Self::Contracts),
            "topics" => Some(Self::Topics),
            _ => None,
        }
    }
}

/// The stable business key used for upsert matching.
///
/// `cycle` disambiguates re-released records: topics reuse their topic number
/// across solicitation cycles, contracts qualify by fiscal year. Both parts
/// come from upstream identifiers, never from fetch-time data, so re-running
/// ingestion can never change a record's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub external_id: String,
    pub cycle: String,
}

impl CompositeKey {
    pub fn new(external_id: impl Into<String>, cycle: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            cycle: cycle.into(),
        }
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.external_id, self.cycle)
    }
}

/// A fully normalized, flat record ready for scoring and upsert.
///
/// All derived fields are computed deterministically from the enriched
/// upstream payload. Missing upstream data becomes `None`, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Originating portal.
    pub source: RecordSource,
    /// Upstream identifier (topic number / generated award id).
    pub external_id: String,
    /// Release/cycle qualifier (solicitation cycle name, fiscal-year tag).
    pub cycle: String,
    /// Record title.
    pub title: Option<String>,
    /// Human-facing identifying code (topic number, award PIID).
    pub code: Option<String>,
    /// Upstream status label (Open, Pre-Release, Active, ...).
    pub status: Option<String>,
    /// Owning agency or component, expanded to its full name.
    pub organization: Option<String>,
    /// Sub-agency, branch, or awarding office.
    pub sub_organization: Option<String>,
    /// Program label (SBIR/STTR phase, award type).
    pub program: Option<String>,
    /// HTML-stripped description, truncated.
    pub description: Option<String>,
    /// HTML-stripped objective/scope text, truncated.
    pub objective: Option<String>,
    /// Keyword list flattened with ", ".
    pub keywords: Option<String>,
    /// Technology/focus areas flattened with ", ".
    pub technology_areas: Option<String>,
    /// Contact entries flattened with "; " (name <email> per entry).
    pub contacts: Option<String>,
    /// Published Q&A payload as JSON, when the sub-fetch succeeded.
    pub questions: Option<String>,
    /// Advertised number of published questions.
    pub question_count: u32,
    /// Whether the Q&A window is open.
    pub qa_open: Option<bool>,
    /// Whether the record is export-controlled.
    pub itar_restricted: Option<bool>,
    /// Window open date.
    pub open_date: Option<NaiveDate>,
    /// Window close date.
    pub close_date: Option<NaiveDate>,
    /// Days remaining until close, relative to normalization time.
    pub days_until_close: Option<i64>,
    /// Window position relative to normalization time.
    pub window_status: Option<WindowStatus>,
    /// Urgency tier derived from days remaining.
    pub urgency: Option<UrgencyTier>,
    /// US-government fiscal year (October 1 boundary).
    pub fiscal_year: Option<i32>,
    /// Monetary value (award amount, potential value).
    pub amount: Option<f64>,
    /// Size bucket for the amount.
    pub amount_category: Option<AmountCategory>,
    /// NAICS industry code (2-6 digits).
    pub naics_code: Option<String>,
    /// Unique Entity Identifier (12 alphanumeric).
    pub uei: Option<String>,
    /// Legacy DUNS number (9 digits).
    pub duns: Option<String>,
    /// Awarded vendor name (contracts only).
    pub vendor_name: Option<String>,
    /// Place of performance, flattened to one line.
    pub place_of_performance: Option<String>,
    /// Derived PDF download URL.
    pub pdf_url: Option<String>,
    /// Derived public portal URL for the record.
    pub portal_url: Option<String>,
    /// Enrichment diagnostics (sub-fetches skipped or failed).
    pub diagnostics: Vec<String>,
}

impl CanonicalRecord {
    /// Create an empty record with its identity fields set.
    pub fn new(
        source: RecordSource,
        external_id: impl Into<String>,
        cycle: impl Into<String>,
    ) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            cycle: cycle.into(),
            title: None,
            code: None,
            status: None,
            organization: None,
            sub_organization: None,
            program: None,
            description: None,
            objective: None,
            keywords: None,
            technology_areas: None,
            contacts: None,
            questions: None,
            question_count: 0,
            qa_open: None,
            itar_restricted: None,
            open_date: None,
            close_date: None,
            days_until_close: None,
            window_status: None,
            urgency: None,
            fiscal_year: None,
            amount: None,
            amount_category: None,
            naics_code: None,
            uei: None,
            duns: None,
            vendor_name: None,
            place_of_performance: None,
            pdf_url: None,
            portal_url: None,
            diagnostics: Vec::new(),
        }
    }

    /// The upsert identity for this record.
    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.external_id.clone(), self.cycle.clone())
    }

    /// A record without an external id can never be stored or retried.
    pub fn has_identity(&self) -> bool {
        !self.external_id.is_empty()
    }

    /// Whether any upstream-content field differs from `other`.
    ///
    /// Clock-derived fields (days_until_close, window_status, urgency) and
    /// diagnostics are ignored, so re-ingesting a quiet record on a later
    /// day still classifies as unchanged.
    pub fn content_differs(&self, other: &CanonicalRecord) -> bool {
        self.title != other.title
            || self.code != other.code
            || self.status != other.status
            || self.organization != other.organization
            || self.sub_organization != other.sub_organization
            || self.program != other.program
            || self.description != other.description
            || self.objective != other.objective
            || self.keywords != other.keywords
            || self.technology_areas != other.technology_areas
            || self.contacts != other.contacts
            || self.questions != other.questions
            || self.question_count != other.question_count
            || self.qa_open != other.qa_open
            || self.itar_restricted != other.itar_restricted
            || self.open_date != other.open_date
            || self.close_date != other.close_date
            || self.fiscal_year != other.fiscal_year
            || self.amount != other.amount
            || self.naics_code != other.naics_code
            || self.uei != other.uei
            || self.duns != other.duns
            || self.vendor_name != other.vendor_name
            || self.place_of_performance != other.place_of_performance
            || self.pdf_url != other.pdf_url
            || self.portal_url != other.portal_url
    }
}
