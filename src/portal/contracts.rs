//! Contracts portal: federal procurement award search and detail.
//!
//! Search is a POST taking a JSON body with a single-day time period filter,
//! award type codes, an explicit field list, and page/limit; the response
//! carries a result list plus pagination metadata. Detail is a GET keyed by
//! the award's generated internal id, and a 404 there is absence rather than
//! an error. Pages are 1-based.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    nonblank, DetailPayload, EnrichedRecord, Portal, PortalClient, PortalError, RecordStub,
    SearchPage, StubPayload,
};
use crate::config::PortalSettings;
use crate::models::{CanonicalRecord, RecordSource};
use crate::normalize::{self, AmountCategory, UrgencyTier};

/// Award type codes swept: BPA, definitive contract, delivery order,
/// purchase order.
const AWARD_TYPE_CODES: [&str; 4] = ["A", "B", "C", "D"];

/// Columns requested from the search endpoint. Result objects are keyed by
/// these display names.
const SEARCH_FIELDS: [&str; 14] = [
    "Award ID",
    "Recipient Name",
    "Start Date",
    "End Date",
    "Award Amount",
    "Total Outlays",
    "Description",
    "def_codes",
    "Award Type",
    "Awarding Agency",
    "Awarding Sub Agency",
    "Contract Award Type",
    "recipient_id",
    "prime_award_recipient_id",
];

/// Public award pages live on the portal's www host, not the API host.
const PUBLIC_AWARD_URL: &str = "https://www.usaspending.gov/award";

#[derive(Debug, Serialize)]
struct SearchBody {
    filters: SearchFilters,
    fields: Vec<&'static str>,
    limit: u32,
    page: u32,
}

#[derive(Debug, Serialize)]
struct SearchFilters {
    time_period: Vec<TimePeriod>,
    award_type_codes: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct TimePeriod {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<AwardSummary>,
    #[serde(default)]
    page_metadata: PageMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default, rename = "hasNext")]
    has_next: Option<bool>,
}

/// One search result. Keys mirror the requested field list, so most are
/// display names rather than snake_case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwardSummary {
    #[serde(default, rename = "Award ID")]
    pub award_id: Option<String>,
    #[serde(default, rename = "Recipient Name")]
    pub recipient_name: Option<String>,
    #[serde(default, rename = "Start Date")]
    pub start_date: Option<String>,
    #[serde(default, rename = "End Date")]
    pub end_date: Option<String>,
    #[serde(default, rename = "Award Amount")]
    pub award_amount: Option<f64>,
    #[serde(default, rename = "Total Outlays")]
    pub total_outlays: Option<f64>,
    #[serde(default, rename = "Description")]
    pub description: Option<String>,
    #[serde(default, rename = "Award Type")]
    pub award_type: Option<String>,
    #[serde(default, rename = "Awarding Agency")]
    pub awarding_agency: Option<String>,
    #[serde(default, rename = "Awarding Sub Agency")]
    pub awarding_sub_agency: Option<String>,
    #[serde(default, rename = "Contract Award Type")]
    pub contract_award_type: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub generated_internal_id: Option<String>,
}

/// Detail payload from the awards endpoint. Partial by design: every field
/// is optional and unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwardDetail {
    #[serde(default)]
    pub piid: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_description: Option<String>,
    #[serde(default)]
    pub total_obligation: Option<f64>,
    #[serde(default)]
    pub base_and_all_options: Option<f64>,
    #[serde(default)]
    pub date_signed: Option<String>,
    #[serde(default)]
    pub recipient: Option<AwardRecipient>,
    #[serde(default)]
    pub period_of_performance: Option<PeriodOfPerformance>,
    #[serde(default)]
    pub place_of_performance: Option<AwardLocation>,
    #[serde(default)]
    pub awarding_agency: Option<AwardingAgency>,
    #[serde(default)]
    pub latest_transaction: Option<LatestTransaction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwardRecipient {
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_uei: Option<String>,
    /// Legacy DUNS number.
    #[serde(default)]
    pub recipient_unique_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodOfPerformance {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwardLocation {
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub state_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwardingAgency {
    #[serde(default)]
    pub toptier_agency: Option<AgencyTier>,
    #[serde(default)]
    pub subtier_agency: Option<AgencyTier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgencyTier {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestTransaction {
    #[serde(default)]
    pub contract_data: Option<ContractData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractData {
    #[serde(default)]
    pub naics: Option<String>,
    #[serde(default)]
    pub naics_description: Option<String>,
}

/// Client for the procurement awards portal.
pub struct ContractsPortal {
    client: PortalClient,
    base_url: String,
}

impl ContractsPortal {
    pub fn new(settings: &PortalSettings) -> Self {
        Self {
            client: PortalClient::new(settings.timeout(), settings.request_delay()),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/search/spending_by_award/", self.base_url)
    }

    fn detail_url(&self, id: &str) -> String {
        format!("{}/awards/{}/", self.base_url, id)
    }

    fn stub_from_summary(summary: AwardSummary) -> RecordStub {
        // The generated internal id is the stable identity; some result rows
        // lack it, and the human-facing Award ID is the fallback
        let external_id = summary
            .generated_internal_id
            .clone()
            .or_else(|| summary.award_id.clone())
            .unwrap_or_default();
        let detail_id = nonblank(summary.generated_internal_id.as_deref());

        RecordStub {
            source: RecordSource::Contracts,
            external_id,
            detail_id,
            active: true,
            payload: StubPayload::Contract(summary),
        }
    }
}

#[async_trait]
impl Portal for ContractsPortal {
    fn source(&self) -> RecordSource {
        RecordSource::Contracts
    }

    fn first_page(&self) -> u32 {
        1
    }

    fn uses_status_filter(&self) -> bool {
        false
    }

    async fn search(
        &self,
        date: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, PortalError> {
        let day = date.format("%Y-%m-%d").to_string();
        let body = SearchBody {
            filters: SearchFilters {
                time_period: vec![TimePeriod {
                    start_date: day.clone(),
                    end_date: day,
                }],
                award_type_codes: AWARD_TYPE_CODES.to_vec(),
            },
            fields: SEARCH_FIELDS.to_vec(),
            limit: page_size,
            page,
        };

        let response: SearchResponse = self.client.post_json(&self.search_url(), &body).await?;
        debug!(
            "contracts search {} page {}: {} results",
            date,
            page,
            response.results.len()
        );

        Ok(SearchPage {
            stubs: response
                .results
                .into_iter()
                .map(Self::stub_from_summary)
                .collect(),
            reported_total: response.page_metadata.total,
            has_next: response.page_metadata.has_next,
        })
    }

    async fn enrich(&self, stub: RecordStub) -> Result<EnrichedRecord, PortalError> {
        let Some(detail_id) = stub.detail_id.clone() else {
            return Ok(EnrichedRecord::stub_only(
                stub,
                "detail skipped: no generated award id",
            ));
        };

        match self
            .client
            .get_json::<AwardDetail>(&self.detail_url(&detail_id))
            .await
        {
            Ok(detail) => Ok(EnrichedRecord {
                stub,
                detail: Some(DetailPayload::Contract(Box::new(detail))),
                questions: None,
                diagnostics: Vec::new(),
            }),
            // Awards with no detail record normalize from the stub alone
            Err(PortalError::NotFound(_)) => {
                Ok(EnrichedRecord::stub_only(stub, "detail not found (404)"))
            }
            Err(err) => Err(err),
        }
    }

    fn normalize(
        &self,
        enriched: &EnrichedRecord,
        today: NaiveDate,
    ) -> Result<CanonicalRecord, PortalError> {
        let StubPayload::Contract(summary) = &enriched.stub.payload else {
            return Err(PortalError::Validation(
                "contracts normalizer received a non-contract stub".to_string(),
            ));
        };
        if enriched.stub.external_id.trim().is_empty() {
            return Err(PortalError::Validation(
                "award has no usable identifier".to_string(),
            ));
        }
        let detail = match &enriched.detail {
            Some(DetailPayload::Contract(detail)) => Some(detail.as_ref()),
            _ => None,
        };

        // The signed date is the stable cycle anchor; awards without one
        // keep a blank cycle and are identified by external id alone
        let signed = summary
            .start_date
            .as_deref()
            .and_then(|s| normalize::parse_valid_date(s, today))
            .or_else(|| {
                detail
                    .and_then(|d| d.date_signed.as_deref())
                    .and_then(|s| normalize::parse_valid_date(s, today))
            });
        let cycle = signed
            .map(|d| format!("FY{}", normalize::fiscal_year(d)))
            .unwrap_or_default();

        let mut record = CanonicalRecord::new(
            RecordSource::Contracts,
            enriched.stub.external_id.clone(),
            cycle,
        );

        let close = summary
            .end_date
            .as_deref()
            .and_then(|s| normalize::parse_valid_date(s, today))
            .or_else(|| {
                detail
                    .and_then(|d| d.period_of_performance.as_ref())
                    .and_then(|p| p.end_date.as_deref())
                    .and_then(|s| normalize::parse_valid_date(s, today))
            });
        let (open, close) = normalize::validate_date_range(signed, close);

        record.open_date = open;
        record.close_date = close;
        record.days_until_close = close.map(|d| normalize::days_until(d, today));
        record.window_status = normalize::window_status(open, close, today);
        record.urgency = record
            .days_until_close
            .map(UrgencyTier::from_days_remaining);
        record.fiscal_year = signed.map(normalize::fiscal_year);

        // Awards carry no title of their own; the requirement description is
        // the closest thing
        record.title = summary
            .description
            .as_deref()
            .and_then(normalize::clean_text);
        record.description = detail
            .and_then(|d| d.description.as_deref())
            .and_then(normalize::clean_text)
            .or_else(|| record.title.clone());

        record.code = nonblank(summary.award_id.as_deref())
            .or_else(|| detail.and_then(|d| nonblank(d.piid.as_deref())));
        record.program = nonblank(summary.contract_award_type.as_deref())
            .or_else(|| nonblank(summary.award_type.as_deref()))
            .or_else(|| detail.and_then(|d| nonblank(d.type_description.as_deref())));

        record.organization = nonblank(summary.awarding_agency.as_deref()).or_else(|| {
            detail
                .and_then(|d| d.awarding_agency.as_ref())
                .and_then(|a| a.toptier_agency.as_ref())
                .and_then(|t| nonblank(t.name.as_deref()))
        });
        record.sub_organization = nonblank(summary.awarding_sub_agency.as_deref()).or_else(|| {
            detail
                .and_then(|d| d.awarding_agency.as_ref())
                .and_then(|a| a.subtier_agency.as_ref())
                .and_then(|t| nonblank(t.name.as_deref()))
        });

        record.amount = summary
            .award_amount
            .and_then(normalize::parse_amount)
            .or_else(|| {
                detail
                    .and_then(|d| d.total_obligation)
                    .and_then(normalize::parse_amount)
            });
        record.amount_category = record.amount.map(AmountCategory::from_amount);

        record.naics_code = detail
            .and_then(|d| d.latest_transaction.as_ref())
            .and_then(|t| t.contract_data.as_ref())
            .and_then(|c| c.naics.as_deref())
            .and_then(normalize::validate_naics);

        let recipient = detail.and_then(|d| d.recipient.as_ref());
        record.uei = recipient
            .and_then(|r| r.recipient_uei.as_deref())
            .and_then(normalize::validate_uei);
        record.duns = recipient
            .and_then(|r| r.recipient_unique_id.as_deref())
            .and_then(normalize::validate_duns);
        record.vendor_name = nonblank(summary.recipient_name.as_deref())
            .or_else(|| recipient.and_then(|r| nonblank(r.recipient_name.as_deref())));

        record.place_of_performance = detail
            .and_then(|d| d.place_of_performance.as_ref())
            .and_then(|place| {
                let parts: Vec<String> = [
                    place.city_name.as_deref(),
                    place.state_code.as_deref(),
                    place.country_name.as_deref(),
                ]
                .into_iter()
                .flatten()
                .map(str::to_string)
                .collect();
                normalize::join_values(&parts)
            });

        let page_id = enriched
            .stub
            .detail_id
            .as_deref()
            .unwrap_or(&enriched.stub.external_id);
        record.portal_url = Some(format!("{PUBLIC_AWARD_URL}/{page_id}"));

        record.diagnostics = enriched.diagnostics.clone();

        Ok(record)
    }
}
