//! Chunked upsert writer with change classification.
//!
//! Records are compared against the store before writing so every row lands
//! in exactly one bucket: inserted, updated, unchanged, or failed. Unchanged
//! rows are not rewritten. Changed rows go to the database in bounded chunks;
//! a failed chunk falls back to row-at-a-time writes so one bad row cannot
//! sink its neighbors.

use tracing::{debug, warn};

use crate::models::{CompositeKey, FailureKind, RecordSource, UnitKey};
use crate::quality::ScoredRecord;
use crate::repository::{DbContext, DbError, FailedItemRepository, RecordRepository};

/// Outcome counts for one write pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteSummary {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl WriteSummary {
    /// Rows that are now current in the store.
    pub fn written(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Writes scored records to the store in chunks.
pub struct UpsertWriter {
    records: RecordRepository,
    failed_items: FailedItemRepository,
    chunk_size: usize,
}

impl UpsertWriter {
    pub fn new(db: &DbContext, chunk_size: usize) -> Self {
        Self {
            records: db.records(),
            failed_items: db.failed_items(),
            chunk_size,
        }
    }

    /// Classify a batch against the store, write what changed, and clear
    /// parked failures for every record that is now current.
    pub async fn write(
        &self,
        source: RecordSource,
        scored: Vec<ScoredRecord>,
        unit: Option<&UnitKey>,
    ) -> Result<WriteSummary, DbError> {
        let mut summary = WriteSummary::default();
        if scored.is_empty() {
            return Ok(summary);
        }

        let keys: Vec<CompositeKey> = scored.iter().map(|s| s.record.key()).collect();
        let existing = self.records.find_by_keys(&keys).await?;

        let mut to_write: Vec<ScoredRecord> = Vec::new();
        let mut current: Vec<CompositeKey> = Vec::new();
        for s in scored {
            match existing.get(&s.record.key()) {
                None => {
                    summary.inserted += 1;
                    to_write.push(s);
                }
                Some(stored) if stored.content_differs(&s.record) => {
                    summary.updated += 1;
                    to_write.push(s);
                }
                Some(_) => {
                    summary.unchanged += 1;
                    current.push(s.record.key());
                }
            }
        }

        for chunk in to_write.chunks(self.chunk_size) {
            match self.records.upsert_chunk(chunk).await {
                Ok(()) => current.extend(chunk.iter().map(|s| s.record.key())),
                Err(chunk_err) => {
                    // Isolate the bad row; the rest of the chunk still lands
                    warn!(
                        "chunk of {} rows failed ({}); retrying row by row",
                        chunk.len(),
                        chunk_err
                    );
                    for s in chunk {
                        match self.records.upsert_one(s).await {
                            Ok(()) => current.push(s.record.key()),
                            Err(row_err) => {
                                summary.failed += 1;
                                if existing.contains_key(&s.record.key()) {
                                    summary.updated -= 1;
                                } else {
                                    summary.inserted -= 1;
                                }
                                self.failed_items
                                    .record_failure(
                                        source,
                                        &s.record.external_id,
                                        FailureKind::Persistence,
                                        &row_err.to_string(),
                                        unit,
                                    )
                                    .await?;
                            }
                        }
                    }
                }
            }
        }

        // A record that is current again has nothing left to retry
        for key in current {
            if let Err(err) = self.failed_items.delete(source, &key.external_id).await {
                debug!("failed-item cleanup for {} failed: {}", key.external_id, err);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CanonicalRecord;
    use tempfile::tempdir;

    async fn setup() -> (DbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    fn sample(external_id: &str, title: &str) -> ScoredRecord {
        let mut record = CanonicalRecord::new(RecordSource::Topics, external_id, "24.1");
        record.title = Some(title.to_string());
        ScoredRecord::new(record)
    }

    #[tokio::test]
    async fn test_write_classifies_insert_update_unchanged() {
        let (ctx, _dir) = setup().await;
        let writer = UpsertWriter::new(&ctx, 250);

        let summary = writer
            .write(
                RecordSource::Topics,
                vec![sample("T-1", "Alpha"), sample("T-2", "Beta")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unchanged, 0);

        // Same content again: nothing to write
        let summary = writer
            .write(
                RecordSource::Topics,
                vec![sample("T-1", "Alpha"), sample("T-2", "Beta")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.unchanged, 2);

        // One changed title: exactly one update
        let summary = writer
            .write(
                RecordSource::Topics,
                vec![sample("T-1", "Alpha v2"), sample("T-2", "Beta")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 0);

        assert_eq!(ctx.records().count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_successful_write_clears_parked_failure() {
        let (ctx, _dir) = setup().await;
        let writer = UpsertWriter::new(&ctx, 250);

        ctx.failed_items()
            .record_failure(
                RecordSource::Topics,
                "T-1",
                FailureKind::Network,
                "connection reset",
                None,
            )
            .await
            .unwrap();
        assert_eq!(ctx.failed_items().count(None).await.unwrap(), 1);

        writer
            .write(RecordSource::Topics, vec![sample("T-1", "Alpha")], None)
            .await
            .unwrap();
        assert_eq!(ctx.failed_items().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_rows_also_clear_failures() {
        let (ctx, _dir) = setup().await;
        let writer = UpsertWriter::new(&ctx, 250);

        writer
            .write(RecordSource::Topics, vec![sample("T-1", "Alpha")], None)
            .await
            .unwrap();
        ctx.failed_items()
            .record_failure(
                RecordSource::Topics,
                "T-1",
                FailureKind::RateLimit,
                "HTTP 429",
                None,
            )
            .await
            .unwrap();

        // Re-fetch produced identical content; the failure is still cleared
        writer
            .write(RecordSource::Topics, vec![sample("T-1", "Alpha")], None)
            .await
            .unwrap();
        assert_eq!(ctx.failed_items().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_larger_than_chunk_size() {
        let (ctx, _dir) = setup().await;
        let writer = UpsertWriter::new(&ctx, 100);

        let batch: Vec<ScoredRecord> = (0..250)
            .map(|i| sample(&format!("T-{i}"), &format!("Topic {i}")))
            .collect();
        let summary = writer
            .write(RecordSource::Topics, batch, None)
            .await
            .unwrap();

        assert_eq!(summary.inserted, 250);
        assert_eq!(ctx.records().count(None).await.unwrap(), 250);
    }
}
