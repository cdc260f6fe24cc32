//! Topics portal: defense research solicitation topics with Q&A.
//!
//! Search is a GET whose filters travel as a single `searchParam` query
//! parameter holding URL-encoded JSON, ordered by modified date descending.
//! Detail and questions are GETs keyed by the topic's GUID. Pages are
//! 0-based, and all portal dates are epoch milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, REFERER};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{
    nonblank, DetailPayload, EnrichedRecord, Portal, PortalClient, PortalError, RecordStub,
    SearchPage, StubPayload,
};
use crate::config::PortalSettings;
use crate::models::{CanonicalRecord, RecordSource};
use crate::normalize::{self, UrgencyTier};

/// Statuses that count as an open or opening opportunity.
pub const ACTIVE_TOPIC_STATUSES: [&str; 3] = ["Active", "Open", "Pre-Release"];

/// Component codes the portal abbreviates, expanded for display.
const COMPONENT_NAMES: [(&str, &str); 8] = [
    ("ARMY", "United States Army"),
    ("NAVY", "United States Navy"),
    ("AIRFORCE", "United States Air Force"),
    ("SPACEFORCE", "United States Space Force"),
    ("DARPA", "Defense Advanced Research Projects Agency"),
    ("DHA", "Defense Health Agency"),
    ("SOCOM", "Special Operations Command"),
    ("MDA", "Missile Defense Agency"),
];

/// JSON filter object carried in the `searchParam` query parameter. The
/// portal expects every key present, nulls included.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchParam {
    search_text: Option<String>,
    components: Option<Vec<String>>,
    program_year: Option<String>,
    solicitation_cycle_names: Option<Vec<String>>,
    release_numbers: Vec<String>,
    topic_release_status: Vec<String>,
    modernization_priorities: Vec<String>,
    sort_by: &'static str,
    technology_area_ids: Vec<String>,
    component: Option<String>,
    program: Option<String>,
}

impl SearchParam {
    fn scoped(cycle_scope: Option<&[String]>) -> Self {
        Self {
            search_text: None,
            components: None,
            program_year: None,
            solicitation_cycle_names: cycle_scope.map(<[String]>::to_vec),
            release_numbers: Vec::new(),
            topic_release_status: Vec::new(),
            modernization_priorities: Vec::new(),
            sort_by: "modifiedDate,desc",
            technology_area_ids: Vec::new(),
            component: None,
            program: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    total: Option<u64>,
    data: Vec<TopicSummary>,
}

/// One topic from the search feed. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicSummary {
    pub topic_id: Option<String>,
    pub topic_code: Option<String>,
    pub topic_title: Option<String>,
    pub component: Option<String>,
    pub command: Option<String>,
    pub program: Option<String>,
    pub cycle_name: Option<String>,
    pub topic_status: Option<String>,
    pub topic_start_date: Option<i64>,
    pub topic_end_date: Option<i64>,
    #[serde(rename = "topicQAStatus")]
    pub topic_qa_status: Option<String>,
    pub topic_question_count: Option<u32>,
    pub no_of_published_questions: Option<u32>,
    pub topic_managers: Vec<TopicManager>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicManager {
    pub name: Option<String>,
    pub email: Option<String>,
    pub assignment_type: Option<String>,
}

/// Detail payload keyed by topic GUID. The endpoint echoes the summary
/// fields too; only the additions are modeled here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicDetail {
    pub objective: Option<String>,
    pub description: Option<String>,
    pub technology_areas: Vec<NamedOrPlain>,
    pub focus_areas: Vec<NamedOrPlain>,
    pub keywords: Vec<NamedOrPlain>,
    /// Seen as a bool on some topics and a yes/no string on others.
    pub itar: Option<serde_json::Value>,
}

/// List entries the portal serves either as `{"name": ...}` objects or as
/// plain strings, depending on the endpoint vintage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamedOrPlain {
    Named { name: Option<String> },
    Plain(String),
}

impl NamedOrPlain {
    fn value(&self) -> Option<String> {
        match self {
            Self::Named { name } => nonblank(name.as_deref()),
            Self::Plain(value) => nonblank(Some(value)),
        }
    }
}

/// One published Q&A entry, persisted verbatim as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicQuestion {
    pub question_no: Option<i64>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub question_status: Option<String>,
}

fn expand_component(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    COMPONENT_NAMES
        .iter()
        .find(|(code, _)| *code == upper)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

fn date_from_epoch_ms(ms: i64, today: NaiveDate) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .and_then(|d| normalize::validate_date(d, today))
}

fn itar_flag(raw: Option<&serde_json::Value>) -> Option<bool> {
    match raw? {
        serde_json::Value::Bool(flag) => Some(*flag),
        serde_json::Value::String(text) => normalize::parse_flag(text),
        _ => None,
    }
}

fn named_values(items: &[NamedOrPlain]) -> Vec<String> {
    items.iter().filter_map(NamedOrPlain::value).collect()
}

/// Technical points of contact as "Name <email>", joined with the contact
/// delimiter. Other assignment types are not public contacts.
fn tpoc_contacts(managers: &[TopicManager]) -> Option<String> {
    let entries: Vec<String> = managers
        .iter()
        .filter(|m| {
            m.assignment_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("TPOC"))
        })
        .filter_map(|m| {
            let name = m.name.as_deref().map(str::trim).unwrap_or_default();
            let email = m.email.as_deref().map(str::trim).unwrap_or_default();
            match (name.is_empty(), email.is_empty()) {
                (true, true) => None,
                (false, true) => Some(name.to_string()),
                (true, false) => Some(email.to_string()),
                (false, false) => Some(format!("{name} <{email}>")),
            }
        })
        .collect();
    normalize::join_contacts(&entries)
}

/// Client for the research topics portal.
pub struct TopicsPortal {
    client: PortalClient,
    base_url: String,
    cycle_scope: Option<Vec<String>>,
}

impl TopicsPortal {
    pub fn new(settings: &PortalSettings) -> Self {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        // The API rejects requests without these two headers
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer null"));
        if let Ok(referer) = HeaderValue::from_str(&format!("{base_url}/topics-app/")) {
            headers.insert(REFERER, referer);
        }

        Self {
            client: PortalClient::with_default_headers(
                settings.timeout(),
                settings.request_delay(),
                headers,
            ),
            base_url,
            cycle_scope: settings.cycle_scope.clone(),
        }
    }

    fn search_url(&self, page: u32, page_size: u32) -> Result<String, PortalError> {
        let param = SearchParam::scoped(self.cycle_scope.as_deref());
        let encoded = serde_json::to_string(&param)
            .map_err(|e| PortalError::Parse(format!("encoding search params: {e}")))?;
        let mut url = Url::parse(&format!("{}/topics/api/public/topics/search", self.base_url))
            .map_err(|e| PortalError::Parse(format!("building search url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("searchParam", &encoded)
            .append_pair("size", &page_size.to_string())
            .append_pair("page", &page.to_string());
        Ok(url.to_string())
    }

    fn detail_url(&self, topic_id: &str) -> String {
        format!("{}/topics/api/public/topics/{}", self.base_url, topic_id)
    }

    fn questions_url(&self, topic_id: &str) -> String {
        format!(
            "{}/topics/api/public/topics/{}/questions",
            self.base_url, topic_id
        )
    }

    fn pdf_url(&self, topic_id: &str) -> String {
        format!(
            "{}/topics/api/public/topics/{}/download/PDF",
            self.base_url, topic_id
        )
    }

    fn portal_page_url(&self, topic_id: &str) -> String {
        format!("{}/topics-app/topic-details/{}", self.base_url, topic_id)
    }

    fn stub_from_summary(summary: TopicSummary) -> RecordStub {
        let active = summary
            .topic_status
            .as_deref()
            .is_some_and(|status| ACTIVE_TOPIC_STATUSES.contains(&status));

        RecordStub {
            source: RecordSource::Topics,
            external_id: summary.topic_code.clone().unwrap_or_default(),
            detail_id: nonblank(summary.topic_id.as_deref()),
            active,
            payload: StubPayload::Topic(summary),
        }
    }
}

#[async_trait]
impl Portal for TopicsPortal {
    fn source(&self) -> RecordSource {
        RecordSource::Topics
    }

    fn first_page(&self) -> u32 {
        0
    }

    fn uses_status_filter(&self) -> bool {
        true
    }

    // The topics search is a global scan ordered by modified date; the unit
    // date labels the sweep rather than filtering it
    async fn search(
        &self,
        _date: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, PortalError> {
        let url = self.search_url(page, page_size)?;
        let response: SearchResponse = self.client.get_json(&url).await?;
        debug!(
            "topics search page {}: {} results, {:?} total",
            page,
            response.data.len(),
            response.total
        );

        Ok(SearchPage {
            stubs: response
                .data
                .into_iter()
                .map(Self::stub_from_summary)
                .collect(),
            reported_total: response.total,
            has_next: None,
        })
    }

    async fn enrich(&self, stub: RecordStub) -> Result<EnrichedRecord, PortalError> {
        let Some(topic_id) = stub.detail_id.clone() else {
            return Ok(EnrichedRecord::stub_only(stub, "detail skipped: no topic id"));
        };

        let detail = match self
            .client
            .get_json::<TopicDetail>(&self.detail_url(&topic_id))
            .await
        {
            Ok(detail) => detail,
            // Topics can vanish between search and detail; the stub still counts
            Err(PortalError::NotFound(_)) => {
                return Ok(EnrichedRecord::stub_only(stub, "detail not found (404)"));
            }
            Err(err) => return Err(err),
        };

        let advertised = match &stub.payload {
            StubPayload::Topic(summary) => summary.topic_question_count.unwrap_or(0),
            _ => 0,
        };

        let mut diagnostics = Vec::new();
        let questions = if advertised > 0 {
            match self
                .client
                .get_json::<Vec<TopicQuestion>>(&self.questions_url(&topic_id))
                .await
            {
                Ok(questions) => Some(questions),
                Err(err) => {
                    diagnostics.push(format!("questions fetch failed: {err}"));
                    None
                }
            }
        } else {
            None
        };

        Ok(EnrichedRecord {
            stub,
            detail: Some(DetailPayload::Topic(Box::new(detail))),
            questions,
            diagnostics,
        })
    }

    fn normalize(
        &self,
        enriched: &EnrichedRecord,
        today: NaiveDate,
    ) -> Result<CanonicalRecord, PortalError> {
        let StubPayload::Topic(summary) = &enriched.stub.payload else {
            return Err(PortalError::Validation(
                "topics normalizer received a non-topic stub".to_string(),
            ));
        };
        let Some(code) = nonblank(summary.topic_code.as_deref()) else {
            return Err(PortalError::Validation(
                "topic has no topic number".to_string(),
            ));
        };
        let Some(cycle) = nonblank(summary.cycle_name.as_deref()) else {
            return Err(PortalError::Validation(format!(
                "topic {code} has no cycle name"
            )));
        };
        let detail = match &enriched.detail {
            Some(DetailPayload::Topic(detail)) => Some(detail.as_ref()),
            _ => None,
        };

        let mut record = CanonicalRecord::new(RecordSource::Topics, code, cycle);

        record.title = summary
            .topic_title
            .as_deref()
            .and_then(normalize::clean_text);
        record.code = Some(record.external_id.clone());
        record.status = nonblank(summary.topic_status.as_deref());
        record.organization = nonblank(summary.component.as_deref())
            .map(|component| expand_component(&component));
        record.sub_organization = nonblank(summary.command.as_deref());
        record.program = nonblank(summary.program.as_deref());

        if let Some(detail) = detail {
            record.description = detail
                .description
                .as_deref()
                .and_then(normalize::clean_text);
            record.objective = detail.objective.as_deref().and_then(normalize::clean_text);
            record.keywords = normalize::join_values(&named_values(&detail.keywords));

            // Focus areas fold into the technology list
            let mut areas = named_values(&detail.technology_areas);
            areas.extend(named_values(&detail.focus_areas));
            record.technology_areas = normalize::join_values(&areas);

            record.itar_restricted = itar_flag(detail.itar.as_ref());
        }

        record.contacts = tpoc_contacts(&summary.topic_managers);

        let open = summary
            .topic_start_date
            .and_then(|ms| date_from_epoch_ms(ms, today));
        let close = summary
            .topic_end_date
            .and_then(|ms| date_from_epoch_ms(ms, today));
        let (open, close) = normalize::validate_date_range(open, close);

        record.open_date = open;
        record.close_date = close;
        record.days_until_close = close.map(|d| normalize::days_until(d, today));
        record.window_status = normalize::window_status(open, close, today);
        record.urgency = record
            .days_until_close
            .map(UrgencyTier::from_days_remaining);
        record.fiscal_year = open.map(normalize::fiscal_year);

        record.qa_open = summary
            .topic_qa_status
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("open"));
        record.question_count = summary
            .no_of_published_questions
            .or(summary.topic_question_count)
            .unwrap_or(0);
        if let Some(questions) = &enriched.questions {
            if !questions.is_empty() {
                record.questions = serde_json::to_string(questions).ok();
            }
        }

        if let Some(topic_id) = enriched.stub.detail_id.as_deref() {
            record.pdf_url = Some(self.pdf_url(topic_id));
            record.portal_url = Some(self.portal_page_url(topic_id));
        }

        record.diagnostics = enriched.diagnostics.clone();

        Ok(record)
    }
}
