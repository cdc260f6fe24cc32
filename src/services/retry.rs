//! Retry pass over parked failed items.
//!
//! Failed items are replayed through the same enrich, normalize, and write
//! chain as the main sweep, grouped by the (date, page) unit that produced
//! them so one page refetch serves every item on it. Items past the attempt
//! cap or with a non-retryable failure kind stay parked; a successful write
//! deletes the item.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::models::{FailedItem, FailureKind, UnitKey};
use crate::portal::Portal;
use crate::quality::ScoredRecord;
use crate::repository::DbContext;
use crate::services::ingest::{enrich_stubs, EnrichOutcome, UpsertWriter};

/// Parameters for one retry pass.
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    /// Only retry items whose originating unit has this date.
    pub date: Option<NaiveDate>,
    /// Retry at most this many items.
    pub limit: Option<u32>,
}

/// Outcome counts for one retry pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetrySummary {
    /// Items a retry was attempted for.
    pub attempted: u64,
    /// Items whose record is current again.
    pub recovered: u64,
    /// Items that failed again.
    pub failed: u64,
    /// Items past the attempt cap or with a non-retryable failure.
    pub parked: u64,
    /// Items lacking the unit context needed to replay them.
    pub skipped: u64,
}

/// Replays failed items for one portal.
pub struct RetryService {
    db: DbContext,
    portal: Arc<dyn Portal>,
    settings: Settings,
    writer: UpsertWriter,
}

impl RetryService {
    pub fn new(db: DbContext, portal: Arc<dyn Portal>, settings: Settings) -> Self {
        let writer = UpsertWriter::new(&db, settings.ingest.chunk());
        Self {
            db,
            portal,
            settings,
            writer,
        }
    }

    pub async fn run(&self, options: RetryOptions) -> Result<RetrySummary> {
        let source = self.portal.source();
        let max_attempts = self.settings.ingest.max_attempts;
        let mut summary = RetrySummary::default();

        let items = self.db.failed_items().list(Some(source)).await?;
        if items.is_empty() {
            info!("no failed items to retry");
            return Ok(summary);
        }

        let mut eligible: Vec<FailedItem> = Vec::new();
        for item in items {
            if !is_eligible(&item, max_attempts) {
                summary.parked += 1;
                continue;
            }
            if let Some(date) = options.date {
                if item.date != Some(date) {
                    continue;
                }
            }
            eligible.push(item);
        }
        if let Some(limit) = options.limit {
            eligible.truncate(limit as usize);
        }
        if eligible.is_empty() {
            info!("no eligible failed items ({} parked)", summary.parked);
            return Ok(summary);
        }
        info!(
            "retrying {} failed items ({} parked)",
            eligible.len(),
            summary.parked
        );

        // Group by originating unit so one page refetch serves every item;
        // replay most recent dates first, same direction as the sweep
        let mut groups: BTreeMap<(Reverse<NaiveDate>, u32), Vec<FailedItem>> = BTreeMap::new();
        for item in eligible {
            match (item.date, item.page) {
                (Some(date), Some(page)) => {
                    groups.entry((Reverse(date), page)).or_default().push(item)
                }
                _ => {
                    warn!(
                        "failed item {} has no unit context, cannot replay it",
                        item.external_id
                    );
                    summary.skipped += 1;
                }
            }
        }

        for ((Reverse(date), page), group) in groups {
            self.retry_group(date, page, group, &mut summary).await?;
        }

        info!(
            "retry pass done: attempted {}, recovered {}, failed {}, parked {}, skipped {}",
            summary.attempted, summary.recovered, summary.failed, summary.parked, summary.skipped
        );
        Ok(summary)
    }

    /// Replay one unit's failed items against a fresh fetch of its page.
    async fn retry_group(
        &self,
        date: NaiveDate,
        page: u32,
        items: Vec<FailedItem>,
        summary: &mut RetrySummary,
    ) -> Result<()> {
        let source = self.portal.source();
        let unit = UnitKey::new(source, date, page);
        summary.attempted += items.len() as u64;

        let worst_attempts = items.iter().map(|i| i.attempt_count).max().unwrap_or(1);
        let delay = retry_delay(worst_attempts);
        debug!(
            "replaying {} items from {} after {}s backoff",
            items.len(),
            unit,
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;

        let page_size = self.settings.ingest.page_size;
        let search = match self.portal.search(date, page, page_size).await {
            Ok(search) => search,
            Err(err) => {
                warn!("replay search for {} failed: {}", unit, err);
                for item in &items {
                    self.db
                        .failed_items()
                        .record_failure(
                            source,
                            &item.external_id,
                            err.failure_kind(),
                            &err.to_string(),
                            Some(&unit),
                        )
                        .await?;
                }
                summary.failed += items.len() as u64;
                return Ok(());
            }
        };

        let wanted: HashSet<&str> = items.iter().map(|i| i.external_id.as_str()).collect();
        let stubs: Vec<_> = search
            .stubs
            .into_iter()
            .filter(|s| wanted.contains(s.external_id.as_str()))
            .collect();

        // An item that vanished from its page cannot recover through replay
        let present: HashSet<String> = stubs.iter().map(|s| s.external_id.clone()).collect();
        for item in &items {
            if !present.contains(&item.external_id) {
                self.db
                    .failed_items()
                    .record_failure(
                        source,
                        &item.external_id,
                        FailureKind::NotFound,
                        "no longer listed on its original page",
                        Some(&unit),
                    )
                    .await?;
                summary.failed += 1;
            }
        }
        if stubs.is_empty() {
            return Ok(());
        }

        let outcomes = enrich_stubs(&self.portal, stubs, self.settings.ingest.workers()).await;
        let today = Utc::now().date_naive();
        let mut scored: Vec<ScoredRecord> = Vec::new();
        for outcome in outcomes {
            match outcome {
                EnrichOutcome::Enriched(enriched) => {
                    match self.portal.normalize(&enriched, today) {
                        Ok(record) => scored.push(ScoredRecord::new(record)),
                        Err(err) => {
                            // A payload that no longer validates parks the item
                            self.db
                                .failed_items()
                                .record_failure(
                                    source,
                                    &enriched.stub.external_id,
                                    err.failure_kind(),
                                    &err.to_string(),
                                    Some(&unit),
                                )
                                .await?;
                            summary.failed += 1;
                        }
                    }
                }
                EnrichOutcome::Failed { external_id, error } => {
                    self.db
                        .failed_items()
                        .record_failure(
                            source,
                            &external_id,
                            error.failure_kind(),
                            &error.to_string(),
                            Some(&unit),
                        )
                        .await?;
                    summary.failed += 1;
                }
            }
        }

        let write = self.writer.write(source, scored, Some(&unit)).await?;
        summary.recovered += write.written();
        summary.failed += write.failed;
        Ok(())
    }
}

/// Whether an item is still worth replaying.
fn is_eligible(item: &FailedItem, max_attempts: u32) -> bool {
    item.kind.is_retryable() && item.attempt_count < max_attempts
}

/// Exponential backoff from the attempt count, capped at 32 seconds.
fn retry_delay(attempts: u32) -> Duration {
    Duration::from_secs(1u64 << attempts.min(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSource;
    use chrono::Utc;

    fn item(kind: FailureKind, attempts: u32) -> FailedItem {
        FailedItem {
            id: 1,
            source: RecordSource::Topics,
            external_id: "T-1".to_string(),
            kind,
            error_message: "boom".to_string(),
            date: None,
            page: None,
            attempt_count: attempts,
            first_failed_at: Utc::now(),
            last_attempt_at: Utc::now(),
        }
    }

    #[test]
    fn test_eligibility_by_kind_and_attempts() {
        assert!(is_eligible(&item(FailureKind::Network, 1), 3));
        assert!(is_eligible(&item(FailureKind::RateLimit, 2), 3));
        assert!(is_eligible(&item(FailureKind::Persistence, 1), 3));

        // At the cap
        assert!(!is_eligible(&item(FailureKind::Network, 3), 3));
        // Never retryable
        assert!(!is_eligible(&item(FailureKind::Validation, 1), 3));
        assert!(!is_eligible(&item(FailureKind::Parse, 1), 3));
        assert!(!is_eligible(&item(FailureKind::NotFound, 1), 3));
    }

    #[test]
    fn test_retry_delay_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(2), Duration::from_secs(4));
        assert_eq!(retry_delay(5), Duration::from_secs(32));
        assert_eq!(retry_delay(40), Duration::from_secs(32));
    }
}
