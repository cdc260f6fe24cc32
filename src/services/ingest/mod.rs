//! Ingestion orchestration: date planning, the page loop, and pacing.
//!
//! A run sweeps dates most recent first. Each (date, page) pair is a durable
//! work unit; completed units are skipped on resume, so a crashed or stopped
//! run picks up where it left off by replaying only unfinished pages. The
//! run itself is persisted after every unit so observers can follow along.

mod enrich;
mod writer;

pub(crate) use enrich::{enrich_stubs, EnrichOutcome};
pub(crate) use writer::UpsertWriter;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{IngestSettings, Settings};
use crate::models::{
    JobKind, JobRun, JobStatus, JobTotals, RecordSource, TriggerSource, UnitCounts, UnitKey,
    WorkUnitStatus,
};
use crate::portal::{Portal, PortalError, SearchPage};
use crate::quality::{BatchQuality, ScoredRecord};
use crate::repository::DbContext;
use crate::services::generator::{DownstreamGenerator, NoopGenerator};

/// Attempts per search page before the unit is marked failed.
const PAGE_RETRY_ATTEMPTS: u32 = 3;
/// Consecutive failed pages before the whole date is abandoned.
const PAGE_FAILURE_LIMIT: u32 = 3;
/// Heartbeat and stale-reclaim cadence while a run is active.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Parameters for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub kind: JobKind,
    pub trigger: TriggerSource,
    /// Override for the number of days to sweep.
    pub days: Option<i64>,
    /// Explicit start of the date range.
    pub from: Option<NaiveDate>,
    /// Explicit end of the date range.
    pub to: Option<NaiveDate>,
    /// Stop after this many completed units.
    pub limit: Option<u32>,
}

impl IngestOptions {
    pub fn full(trigger: TriggerSource) -> Self {
        Self {
            kind: JobKind::Full,
            trigger,
            days: None,
            from: None,
            to: None,
            limit: None,
        }
    }

    pub fn recent(trigger: TriggerSource) -> Self {
        Self {
            kind: JobKind::Recent,
            ..Self::full(trigger)
        }
    }
}

/// How a sweep ended.
enum SweepEnd {
    Finished,
    Stopped,
}

/// How one date's page loop ended.
enum DateEnd {
    /// No more pages for this date.
    Exhausted,
    /// Too many consecutive failed pages; move on.
    Abandoned,
    Stopped,
    LimitReached,
}

/// Drives one portal through search, enrichment, normalization, and writes.
pub struct IngestService {
    db: DbContext,
    portal: Arc<dyn Portal>,
    settings: Settings,
    writer: UpsertWriter,
    generator: Arc<dyn DownstreamGenerator>,
    stop: Arc<AtomicBool>,
    /// Row id of the unit currently being processed, 0 when idle. The
    /// watchdog heartbeats this unit so it is not reclaimed as stale.
    current_unit: Arc<AtomicI64>,
}

impl IngestService {
    pub fn new(db: DbContext, portal: Arc<dyn Portal>, settings: Settings) -> Self {
        let writer = UpsertWriter::new(&db, settings.ingest.chunk());
        Self {
            db,
            portal,
            settings,
            writer,
            generator: Arc::new(NoopGenerator),
            stop: Arc::new(AtomicBool::new(false)),
            current_unit: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn DownstreamGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Cooperative stop flag, honored between units.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Execute one run to a terminal state and return the persisted record.
    ///
    /// Sweep-level failures are captured on the run (status failed) rather
    /// than returned; `Err` here means the run itself could not be persisted.
    pub async fn run(&self, options: IngestOptions) -> Result<JobRun> {
        let source = self.portal.source();
        let mut run = JobRun::new(source, options.kind, options.trigger);
        run.status = JobStatus::Running;
        run.log.push(format!(
            "{} {} sweep started ({})",
            source.as_str(),
            options.kind.as_str(),
            options.trigger.as_str()
        ));
        self.db.job_runs().save(&run).await?;
        info!(
            "run {} started: {} {} sweep",
            run.id,
            source.as_str(),
            options.kind.as_str()
        );

        // Units and runs left behind by a dead process become claimable again
        let stale_after = self.settings.ingest.stale_after();
        let abandoned = self.db.job_runs().fail_abandoned(source, stale_after).await?;
        if abandoned > 0 {
            info!("closed {} abandoned runs from earlier processes", abandoned);
            run.log.push(format!("closed {} abandoned runs", abandoned));
        }
        let reclaimed = self.db.work_units().reclaim_stale(source, stale_after).await?;
        if reclaimed > 0 {
            info!("reclaimed {} stale units from earlier runs", reclaimed);
            run.log.push(format!("reclaimed {} stale units", reclaimed));
        }

        let watchdog = self.spawn_watchdog(run.id.clone());
        let end = self.sweep(&mut run, &options).await;
        watchdog.abort();
        self.current_unit.store(0, Ordering::SeqCst);

        match end {
            Ok(SweepEnd::Finished) => {
                run.status = JobStatus::Completed;
                run.log.push("sweep completed".to_string());
            }
            Ok(SweepEnd::Stopped) => {
                run.status = JobStatus::Paused;
                run.log.push("stop requested; run paused".to_string());
                info!("run {} paused on stop request", run.id);
            }
            Err(err) => {
                run.status = JobStatus::Failed;
                run.error = Some(err.to_string());
                run.log.push(format!("run failed: {}", err));
                error!("run {} failed: {}", run.id, err);
            }
        }
        run.finished_at = Some(Utc::now());
        run.last_activity = Utc::now();

        if run.status == JobStatus::Completed {
            let outcome = self.generator.generate(source, &run.totals).await;
            run.log.push(format!(
                "generator {}: {}",
                self.generator.name(),
                outcome.detail
            ));
            if !outcome.success {
                warn!(
                    "generator {} reported failure: {}",
                    self.generator.name(),
                    outcome.detail
                );
            }
        }

        self.db.job_runs().save(&run).await?;
        info!(
            "run {} {}: found {}, inserted {}, updated {}, unchanged {}, failed {}",
            run.id,
            run.status.as_str(),
            run.totals.found,
            run.totals.inserted,
            run.totals.updated,
            run.totals.unchanged,
            run.totals.failed
        );
        Ok(run)
    }

    async fn sweep(&self, run: &mut JobRun, options: &IngestOptions) -> Result<SweepEnd> {
        let today = Utc::now().date_naive();
        let dates = plan_dates(self.portal.source(), &self.settings.ingest, options, today);
        info!("sweeping {} dates, most recent first", dates.len());

        let mut first = true;
        for date in dates {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(SweepEnd::Stopped);
            }
            if self.limit_reached(run, options) {
                run.log.push(format!("unit limit {} reached", run.units_completed));
                return Ok(SweepEnd::Finished);
            }
            if !first {
                tokio::time::sleep(self.settings.ingest.date_delay()).await;
            }
            first = false;

            match self.sweep_date(run, options, date).await? {
                DateEnd::Exhausted => {}
                DateEnd::Abandoned => {
                    warn!(
                        "abandoning {} after {} consecutive failed pages",
                        date, PAGE_FAILURE_LIMIT
                    );
                    run.log.push(format!(
                        "date {} abandoned after {} consecutive failed pages",
                        date, PAGE_FAILURE_LIMIT
                    ));
                }
                DateEnd::Stopped => return Ok(SweepEnd::Stopped),
                DateEnd::LimitReached => return Ok(SweepEnd::Finished),
            }
        }
        Ok(SweepEnd::Finished)
    }

    /// Walk one date's pages until the portal says there are no more.
    async fn sweep_date(
        &self,
        run: &mut JobRun,
        options: &IngestOptions,
        date: NaiveDate,
    ) -> Result<DateEnd> {
        let source = self.portal.source();
        let page_size = self.settings.ingest.page_size;
        let pause_every = self.settings.ingest.pause_every_units;
        let zero_window = self.settings.ingest.zero_match_window;

        let mut page = self.portal.first_page();
        let mut cumulative: u64 = 0;
        let mut zero_streak: u32 = 0;
        let mut failed_pages: u32 = 0;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(DateEnd::Stopped);
            }
            if self.limit_reached(run, options) {
                run.log.push(format!("unit limit {} reached", run.units_completed));
                return Ok(DateEnd::LimitReached);
            }

            let key = UnitKey::new(source, date, page);
            let unit = self.db.work_units().get_or_create(&key).await?;
            if unit.status == WorkUnitStatus::Completed {
                // Resume: trust the stored counts, refetch nothing
                debug!("unit {} already completed, skipping", key);
                cumulative += unit.counts.found as u64;
                if unit.counts.found < page_size {
                    return Ok(DateEnd::Exhausted);
                }
                page += 1;
                continue;
            }

            self.db.work_units().mark_running(unit.id).await?;
            self.current_unit.store(unit.id, Ordering::SeqCst);

            let search = match self.fetch_page_with_retry(date, page, page_size).await {
                Ok(search) => {
                    failed_pages = 0;
                    search
                }
                Err(err) => {
                    self.db
                        .work_units()
                        .mark_failed(unit.id, &err.to_string())
                        .await?;
                    self.current_unit.store(0, Ordering::SeqCst);
                    warn!("unit {} failed: {}", key, err);
                    run.log.push(format!("unit {} failed: {}", key, err));
                    run.units_total += 1;
                    run.last_activity = Utc::now();
                    self.db.job_runs().save(run).await?;

                    failed_pages += 1;
                    if failed_pages >= PAGE_FAILURE_LIMIT {
                        return Ok(DateEnd::Abandoned);
                    }
                    page += 1;
                    tokio::time::sleep(self.settings.ingest.page_delay()).await;
                    continue;
                }
            };

            let found = search.stubs.len() as u32;
            let matched = if self.portal.uses_status_filter() {
                search.active_count() as u32
            } else {
                found
            };
            let is_final = search.is_final(page_size, cumulative + found as u64);
            cumulative += found as u64;

            let counts = self.process_unit(run, &key, search).await?;
            self.db.work_units().mark_completed(unit.id, &counts).await?;
            self.current_unit.store(0, Ordering::SeqCst);

            run.units_total += 1;
            run.units_completed += 1;
            run.last_activity = Utc::now();
            self.db.job_runs().save(run).await?;

            if pause_every > 0 && run.units_completed % pause_every == 0 {
                info!(
                    "processed {} units, pausing {}s",
                    run.units_completed,
                    self.settings.ingest.pause_duration().as_secs()
                );
                run.log.push(format!(
                    "pausing {}s after {} units",
                    self.settings.ingest.pause_duration().as_secs(),
                    run.units_completed
                ));
                tokio::time::sleep(self.settings.ingest.pause_duration()).await;
            }

            // Status-filtered sweeps stop early after a stretch of pages with
            // no matching records; unfiltered sweeps must walk every page
            if self.portal.uses_status_filter() {
                if matched == 0 {
                    zero_streak += 1;
                    if zero_streak >= zero_window {
                        info!(
                            "{} pages without a matching record, ending {} early",
                            zero_streak, date
                        );
                        run.log.push(format!(
                            "date {} ended after {} pages without matches",
                            date, zero_streak
                        ));
                        return Ok(DateEnd::Exhausted);
                    }
                } else {
                    zero_streak = 0;
                }
            }

            if is_final {
                return Ok(DateEnd::Exhausted);
            }
            page += 1;
            tokio::time::sleep(self.settings.ingest.page_delay()).await;
        }
    }

    /// Enrich, normalize, score, and write one page of stubs.
    async fn process_unit(
        &self,
        run: &mut JobRun,
        key: &UnitKey,
        search: SearchPage,
    ) -> Result<UnitCounts> {
        let source = self.portal.source();
        let found = search.stubs.len() as u32;
        let mut totals = JobTotals {
            found: found as u64,
            ..JobTotals::default()
        };

        let outcomes =
            enrich_stubs(&self.portal, search.stubs, self.settings.ingest.workers()).await;

        let today = Utc::now().date_naive();
        let mut scored: Vec<ScoredRecord> = Vec::new();
        let mut batch = BatchQuality::new();
        let mut skipped: u64 = 0;
        let mut enrich_failed: u64 = 0;

        for outcome in outcomes {
            match outcome {
                EnrichOutcome::Enriched(enriched) => {
                    match self.portal.normalize(&enriched, today) {
                        Ok(record) => {
                            let s = ScoredRecord::new(record);
                            batch.observe(&s.quality);
                            scored.push(s);
                        }
                        Err(err) => {
                            // Unusable payloads are skipped, not parked
                            debug!("skipping {}: {}", enriched.stub.external_id, err);
                            skipped += 1;
                        }
                    }
                }
                EnrichOutcome::Failed { external_id, error } => {
                    enrich_failed += 1;
                    if external_id.is_empty() {
                        warn!("enrichment failed for a stub with no identity: {}", error);
                    } else {
                        self.db
                            .failed_items()
                            .record_failure(
                                source,
                                &external_id,
                                error.failure_kind(),
                                &error.to_string(),
                                Some(key),
                            )
                            .await?;
                    }
                }
            }
        }
        totals.processed = scored.len() as u64;

        let summary = self.writer.write(source, scored, Some(key)).await?;
        totals.inserted = summary.inserted;
        totals.updated = summary.updated;
        totals.unchanged = summary.unchanged;
        totals.failed = enrich_failed + summary.failed;
        run.totals.absorb(&totals);

        let mut line = format!(
            "unit {}: found {}, inserted {}, updated {}, unchanged {}, failed {}",
            key, found, totals.inserted, totals.updated, totals.unchanged, totals.failed
        );
        if skipped > 0 {
            line.push_str(&format!(", skipped {}", skipped));
        }
        info!("{} (avg quality {:.0})", line, batch.average());
        run.log.push(line);

        Ok(UnitCounts::new(
            found,
            summary.written() as u32,
            totals.failed as u32,
        ))
    }

    /// Fetch one search page, retrying transient failures with backoff.
    async fn fetch_page_with_retry(
        &self,
        date: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, PortalError> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);
        loop {
            attempt += 1;
            match self.portal.search(date, page, page_size).await {
                Ok(search) => return Ok(search),
                Err(err) if attempt < PAGE_RETRY_ATTEMPTS && err.is_retryable() => {
                    warn!(
                        "search {} p{} attempt {} failed: {}; retrying in {}s",
                        date,
                        page,
                        attempt,
                        err,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn limit_reached(&self, run: &JobRun, options: &IngestOptions) -> bool {
        options
            .limit
            .map(|cap| run.units_completed >= cap)
            .unwrap_or(false)
    }

    /// Background task that heartbeats the run and its active unit, and
    /// reclaims units abandoned by dead processes.
    fn spawn_watchdog(&self, run_id: String) -> tokio::task::JoinHandle<()> {
        let work_units = self.db.work_units();
        let job_runs = self.db.job_runs();
        let source = self.portal.source();
        let stale_after = self.settings.ingest.stale_after();
        let current_unit = Arc::clone(&self.current_unit);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = job_runs.touch(&run_id).await {
                    warn!("heartbeat for run {} failed: {}", run_id, err);
                }
                let id = current_unit.load(Ordering::SeqCst);
                if id != 0 {
                    if let Err(err) = work_units.heartbeat(id).await {
                        warn!("heartbeat for unit {} failed: {}", id, err);
                    }
                }
                match work_units.reclaim_stale(source, stale_after).await {
                    Ok(0) => {}
                    Ok(n) => info!("reclaimed {} stale units", n),
                    Err(err) => warn!("stale-unit reclaim failed: {}", err),
                }
            }
        })
    }
}

/// Dates a run will sweep, most recent first.
///
/// The topics search is one global scan ordered by modified date, so a single
/// unit-date labels the whole sweep. The contracts portal filters by award
/// date and gets one unit sequence per day.
pub(crate) fn plan_dates(
    source: RecordSource,
    ingest: &IngestSettings,
    options: &IngestOptions,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    if source == RecordSource::Topics {
        return vec![today];
    }

    let span = options
        .days
        .unwrap_or(match options.kind {
            JobKind::Recent => ingest.recent_days,
            JobKind::Full => ingest.history_days,
        })
        .max(1);
    let (start, end) = match (options.from, options.to) {
        (Some(a), Some(b)) => (a.min(b), a.max(b)),
        (Some(a), None) => (a, today),
        (None, Some(b)) => (b - chrono::Duration::days(span - 1), b),
        (None, None) => (today - chrono::Duration::days(span - 1), today),
    };

    let mut dates = Vec::new();
    let mut date = end;
    while date >= start {
        dates.push(date);
        date -= chrono::Duration::days(1);
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_plan_dates_topics_single_scan() {
        let options = IngestOptions::full(TriggerSource::Cli);
        let dates = plan_dates(
            RecordSource::Topics,
            &IngestSettings::default(),
            &options,
            d("2024-06-15"),
        );
        assert_eq!(dates, vec![d("2024-06-15")]);
    }

    #[test]
    fn test_plan_dates_recent_descends_from_today() {
        let options = IngestOptions::recent(TriggerSource::Scheduled);
        let dates = plan_dates(
            RecordSource::Contracts,
            &IngestSettings::default(),
            &options,
            d("2024-06-15"),
        );
        assert_eq!(
            dates,
            vec![d("2024-06-15"), d("2024-06-14"), d("2024-06-13")]
        );
    }

    #[test]
    fn test_plan_dates_full_uses_history_span() {
        let options = IngestOptions::full(TriggerSource::Cli);
        let dates = plan_dates(
            RecordSource::Contracts,
            &IngestSettings::default(),
            &options,
            d("2024-06-15"),
        );
        assert_eq!(dates.len(), 30);
        assert_eq!(dates[0], d("2024-06-15"));
        assert_eq!(dates[29], d("2024-05-17"));
    }

    #[test]
    fn test_plan_dates_explicit_range_is_inclusive() {
        let mut options = IngestOptions::full(TriggerSource::Cli);
        options.from = Some(d("2024-06-10"));
        options.to = Some(d("2024-06-12"));
        let dates = plan_dates(
            RecordSource::Contracts,
            &IngestSettings::default(),
            &options,
            d("2024-06-15"),
        );
        assert_eq!(
            dates,
            vec![d("2024-06-12"), d("2024-06-11"), d("2024-06-10")]
        );
    }

    #[test]
    fn test_plan_dates_reversed_range_is_normalized() {
        let mut options = IngestOptions::full(TriggerSource::Cli);
        options.from = Some(d("2024-06-12"));
        options.to = Some(d("2024-06-10"));
        let dates = plan_dates(
            RecordSource::Contracts,
            &IngestSettings::default(),
            &options,
            d("2024-06-15"),
        );
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], d("2024-06-12"));
    }

    #[test]
    fn test_plan_dates_days_override() {
        let mut options = IngestOptions::full(TriggerSource::Cli);
        options.days = Some(1);
        let dates = plan_dates(
            RecordSource::Contracts,
            &IngestSettings::default(),
            &options,
            d("2024-06-15"),
        );
        assert_eq!(dates, vec![d("2024-06-15")]);
    }
}
