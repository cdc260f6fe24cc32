//! End-to-end ingestion tests over a scripted portal.
//!
//! A canned portal serves fixed search pages and details so the full
//! pipeline (work units, enrichment, normalization, scoring, writes,
//! resume, retry) runs against a real SQLite store without any network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use govharvest::config::Settings;
use govharvest::models::{
    CanonicalRecord, FailureKind, JobStatus, RecordSource, TriggerSource, UnitKey, WorkUnitStatus,
};
use govharvest::portal::contracts::AwardSummary;
use govharvest::portal::topics::TopicSummary;
use govharvest::portal::{EnrichedRecord, Portal, PortalError, RecordStub, SearchPage, StubPayload};
use govharvest::repository::DbContext;
use govharvest::services::{IngestOptions, IngestService, RetryOptions, RetryService};

/// Serves pre-built search pages, recording every page requested. Pages past
/// the end of the script come back empty, which reads as a final short page.
struct ScriptedPortal {
    source: RecordSource,
    status_filter: bool,
    pages: Vec<SearchPage>,
    /// External ids whose detail fetch fails with a network error.
    broken_details: HashSet<String>,
    /// Page numbers that fail with a parse error.
    broken_pages: HashSet<u32>,
    /// Every page number requested, in order, across all runs.
    search_log: Mutex<Vec<u32>>,
    /// When armed, set after every search so the run stops at the next unit.
    stop_flag: Mutex<Option<Arc<AtomicBool>>>,
}

impl ScriptedPortal {
    fn new(source: RecordSource, pages: Vec<SearchPage>) -> Self {
        Self {
            source,
            status_filter: false,
            pages,
            broken_details: HashSet::new(),
            broken_pages: HashSet::new(),
            search_log: Mutex::new(Vec::new()),
            stop_flag: Mutex::new(None),
        }
    }

    fn with_status_filter(mut self) -> Self {
        self.status_filter = true;
        self
    }

    fn with_broken_detail(mut self, external_id: &str) -> Self {
        self.broken_details.insert(external_id.to_string());
        self
    }

    fn with_broken_page(mut self, page: u32) -> Self {
        self.broken_pages.insert(page);
        self
    }

    fn arm_stop(&self, flag: Arc<AtomicBool>) {
        *self.stop_flag.lock().unwrap() = Some(flag);
    }

    fn searched_pages(&self) -> Vec<u32> {
        self.search_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Portal for ScriptedPortal {
    fn source(&self) -> RecordSource {
        self.source
    }

    fn first_page(&self) -> u32 {
        1
    }

    fn uses_status_filter(&self) -> bool {
        self.status_filter
    }

    async fn search(
        &self,
        _date: NaiveDate,
        page: u32,
        _page_size: u32,
    ) -> Result<SearchPage, PortalError> {
        self.search_log.lock().unwrap().push(page);
        if self.broken_pages.contains(&page) {
            return Err(PortalError::Parse(format!("malformed page {}", page)));
        }
        let served = self
            .pages
            .get((page - 1) as usize)
            .cloned()
            .unwrap_or_else(|| SearchPage {
                stubs: Vec::new(),
                reported_total: None,
                has_next: Some(false),
            });
        if let Some(flag) = self.stop_flag.lock().unwrap().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(served)
    }

    async fn enrich(&self, stub: RecordStub) -> Result<EnrichedRecord, PortalError> {
        if self.broken_details.contains(stub.external_id.as_str()) {
            return Err(PortalError::Network(format!(
                "detail fetch for {} timed out",
                stub.external_id
            )));
        }
        Ok(EnrichedRecord {
            stub,
            detail: None,
            questions: None,
            diagnostics: Vec::new(),
        })
    }

    fn normalize(
        &self,
        enriched: &EnrichedRecord,
        _today: NaiveDate,
    ) -> Result<CanonicalRecord, PortalError> {
        let mut record =
            CanonicalRecord::new(self.source, enriched.stub.external_id.clone(), "24.4");
        record.title = Some(format!("Scripted record {}", enriched.stub.external_id));
        record.status = Some("Open".to_string());
        Ok(record)
    }
}

fn stub(source: RecordSource, n: usize, active: bool) -> RecordStub {
    let payload = match source {
        RecordSource::Contracts => StubPayload::Contract(AwardSummary::default()),
        RecordSource::Topics => StubPayload::Topic(TopicSummary::default()),
    };
    RecordStub {
        source,
        external_id: format!("R-{:03}", n),
        detail_id: None,
        active,
        payload,
    }
}

/// One page holding stubs numbered `start..start + size`.
fn page(source: RecordSource, start: usize, size: usize, active: bool) -> SearchPage {
    SearchPage {
        stubs: (start..start + size)
            .map(|n| stub(source, n, active))
            .collect(),
        reported_total: None,
        has_next: None,
    }
}

/// Pages with the given stub counts, ids numbered sequentially across pages.
fn pages(source: RecordSource, sizes: &[usize]) -> Vec<SearchPage> {
    let mut start = 1;
    sizes
        .iter()
        .map(|&size| {
            let p = page(source, start, size, true);
            start += size;
            p
        })
        .collect()
}

/// Settings tuned for tests: tiny pages, no pacing delays, no long pauses.
fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
    settings.database_url = None;
    settings.ingest.page_size = 3;
    settings.ingest.page_delay_ms = 0;
    settings.ingest.date_delay_ms = 0;
    settings.ingest.pause_every_units = 0;
    settings
}

async fn setup_db(settings: &Settings) -> DbContext {
    let db = DbContext::new(&settings.database_path());
    db.init_schema().await.unwrap();
    db
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[tokio::test]
async fn test_sweep_writes_all_pages() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let portal = Arc::new(ScriptedPortal::new(
        RecordSource::Topics,
        pages(RecordSource::Topics, &[3, 2]),
    ));
    let service = IngestService::new(db.clone(), portal.clone(), settings.clone());

    let run = service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();

    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(run.totals.found, 5);
    assert_eq!(run.totals.processed, 5);
    assert_eq!(run.totals.inserted, 5);
    assert_eq!(run.totals.failed, 0);
    assert_eq!(run.units_completed, 2);
    assert_eq!(portal.searched_pages(), vec![1, 2]);
    assert_eq!(
        db.records().count(Some(RecordSource::Topics)).await.unwrap(),
        5
    );

    // The run is persisted in its final state
    let stored = db.job_runs().get(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.finished_at.is_some());
    assert!(!stored.log.tail(50).is_empty());
}

#[tokio::test]
async fn test_rerun_same_day_skips_completed_units() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let portal = Arc::new(ScriptedPortal::new(
        RecordSource::Topics,
        pages(RecordSource::Topics, &[3, 2]),
    ));
    let service = IngestService::new(db.clone(), portal.clone(), settings.clone());

    service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();
    let rerun = service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();

    // Both units are already completed, so nothing is refetched
    assert_eq!(rerun.status, JobStatus::Completed);
    assert_eq!(rerun.totals.found, 0);
    assert_eq!(rerun.units_completed, 0);
    assert_eq!(portal.searched_pages(), vec![1, 2]);
    assert_eq!(db.records().count(None).await.unwrap(), 5);
}

#[tokio::test]
async fn test_next_day_sweep_classifies_unchanged() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let portal = Arc::new(ScriptedPortal::new(
        RecordSource::Contracts,
        pages(RecordSource::Contracts, &[3, 2]),
    ));
    let service = IngestService::new(db.clone(), portal.clone(), settings.clone());

    let mut day_one = IngestOptions::full(TriggerSource::Cli);
    day_one.from = Some(d("2024-06-10"));
    day_one.to = Some(d("2024-06-10"));
    let first = service.run(day_one).await.unwrap();
    assert_eq!(first.totals.inserted, 5);

    // Next day's units are fresh, but the portal serves identical content
    let mut day_two = IngestOptions::full(TriggerSource::Cli);
    day_two.from = Some(d("2024-06-11"));
    day_two.to = Some(d("2024-06-11"));
    let second = service.run(day_two).await.unwrap();

    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.totals.inserted, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(second.totals.unchanged, 5);
    assert_eq!(db.records().count(None).await.unwrap(), 5);
}

#[tokio::test]
async fn test_stop_flag_pauses_and_resume_completes() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let portal = Arc::new(ScriptedPortal::new(
        RecordSource::Topics,
        pages(RecordSource::Topics, &[3, 3, 2]),
    ));
    let service = IngestService::new(db.clone(), portal.clone(), settings.clone());
    portal.arm_stop(service.stop_flag());

    let paused = service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.units_completed, 1);
    assert_eq!(portal.searched_pages(), vec![1]);
    assert_eq!(db.records().count(None).await.unwrap(), 3);
    let stored = db.job_runs().get(&paused.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Paused);

    // A fresh run picks up at page 2; the armed flag only stops the old run
    let resumed = IngestService::new(db.clone(), portal.clone(), settings.clone())
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.totals.found, 5);
    assert_eq!(resumed.units_completed, 2);
    assert_eq!(portal.searched_pages(), vec![1, 2, 3]);
    assert_eq!(db.records().count(None).await.unwrap(), 8);
}

#[tokio::test]
async fn test_enrich_failure_parks_item_and_rest_lands() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let portal = Arc::new(
        ScriptedPortal::new(RecordSource::Topics, pages(RecordSource::Topics, &[3, 2]))
            .with_broken_detail("R-002"),
    );
    let service = IngestService::new(db.clone(), portal, settings.clone());

    let run = service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();

    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(run.totals.found, 5);
    assert_eq!(run.totals.processed, 4);
    assert_eq!(run.totals.inserted, 4);
    assert_eq!(run.totals.failed, 1);
    assert_eq!(db.records().count(None).await.unwrap(), 4);

    let item = db
        .failed_items()
        .get(RecordSource::Topics, "R-002")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.kind, FailureKind::Network);
    assert_eq!(item.attempt_count, 1);
    assert_eq!(item.page, Some(1));
    assert!(item.date.is_some());
}

#[tokio::test]
async fn test_retry_recovers_parked_item() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let unit = UnitKey::new(RecordSource::Topics, d("2024-06-10"), 1);
    db.failed_items()
        .record_failure(
            RecordSource::Topics,
            "R-002",
            FailureKind::Network,
            "detail fetch for R-002 timed out",
            Some(&unit),
        )
        .await
        .unwrap();

    // The portal serves the item's original page, details working again
    let portal = Arc::new(ScriptedPortal::new(
        RecordSource::Topics,
        pages(RecordSource::Topics, &[3]),
    ));
    let service = RetryService::new(db.clone(), portal.clone(), settings.clone());

    let summary = service.run(RetryOptions::default()).await.unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.recovered, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.parked, 0);
    assert_eq!(portal.searched_pages(), vec![1]);
    assert_eq!(db.records().count(None).await.unwrap(), 1);
    assert!(db
        .failed_items()
        .get(RecordSource::Topics, "R-002")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_retry_parks_item_missing_from_its_page() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let unit = UnitKey::new(RecordSource::Topics, d("2024-06-10"), 1);
    db.failed_items()
        .record_failure(
            RecordSource::Topics,
            "R-099",
            FailureKind::Network,
            "detail fetch for R-099 timed out",
            Some(&unit),
        )
        .await
        .unwrap();

    let portal = Arc::new(ScriptedPortal::new(
        RecordSource::Topics,
        pages(RecordSource::Topics, &[3]),
    ));
    let service = RetryService::new(db.clone(), portal, settings.clone());

    let summary = service.run(RetryOptions::default()).await.unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.recovered, 0);
    assert_eq!(summary.failed, 1);

    // The replay marked it not-found, which parks it from future retries
    let item = db
        .failed_items()
        .get(RecordSource::Topics, "R-099")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.kind, FailureKind::NotFound);
    assert_eq!(item.attempt_count, 2);
}

#[tokio::test]
async fn test_failed_page_is_recorded_and_sweep_continues() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let db = setup_db(&settings).await;

    let portal = Arc::new(
        ScriptedPortal::new(
            RecordSource::Topics,
            pages(RecordSource::Topics, &[3, 3, 2]),
        )
        .with_broken_page(2),
    );
    let service = IngestService::new(db.clone(), portal.clone(), settings.clone());

    let run = service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();

    // Parse errors are not retryable, so page 2 fails once and the sweep
    // moves on to page 3
    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(portal.searched_pages(), vec![1, 2, 3]);
    assert_eq!(run.units_total, 3);
    assert_eq!(run.units_completed, 2);
    assert_eq!(db.records().count(None).await.unwrap(), 5);

    let stats = db.work_units().stats(Some(RecordSource::Topics)).await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);

    let incomplete = db
        .work_units()
        .list_incomplete(RecordSource::Topics)
        .await
        .unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].key.page, 2);
    assert_eq!(incomplete[0].status, WorkUnitStatus::Failed);
}

#[tokio::test]
async fn test_zero_match_window_ends_filtered_sweep_early() {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(&dir);
    settings.ingest.zero_match_window = 2;
    let db = setup_db(&settings).await;

    // Full pages, but everything after page 1 misses the status filter
    let script = vec![
        page(RecordSource::Topics, 1, 3, true),
        page(RecordSource::Topics, 4, 3, false),
        page(RecordSource::Topics, 7, 3, false),
        page(RecordSource::Topics, 10, 3, true),
    ];
    let portal =
        Arc::new(ScriptedPortal::new(RecordSource::Topics, script).with_status_filter());
    let service = IngestService::new(db.clone(), portal.clone(), settings.clone());

    let run = service
        .run(IngestOptions::recent(TriggerSource::Cli))
        .await
        .unwrap();

    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(portal.searched_pages(), vec![1, 2, 3]);
    assert_eq!(run.units_completed, 3);
    // Non-matching stubs on swept pages are still ingested
    assert_eq!(db.records().count(None).await.unwrap(), 9);
}
