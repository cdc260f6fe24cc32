//! Downstream generation hook.
//!
//! After a sweep finishes, freshly written records can feed a downstream
//! artifact build (static pages, search indexes, exports). Ingestion only
//! reports the outcome in the run log; generation can never fail a run.

use async_trait::async_trait;

use crate::models::{JobTotals, RecordSource};

/// Result of a generation pass, recorded in the run log.
#[derive(Debug, Clone)]
pub struct GeneratorOutcome {
    pub success: bool,
    pub detail: String,
}

impl GeneratorOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Hook invoked after a completed sweep.
#[async_trait]
pub trait DownstreamGenerator: Send + Sync {
    /// Short name used in run logs.
    fn name(&self) -> &'static str;

    /// Build downstream artifacts from the store.
    async fn generate(&self, source: RecordSource, totals: &JobTotals) -> GeneratorOutcome;
}

/// Default generator: does nothing and says so.
pub struct NoopGenerator;

#[async_trait]
impl DownstreamGenerator for NoopGenerator {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn generate(&self, _source: RecordSource, totals: &JobTotals) -> GeneratorOutcome {
        GeneratorOutcome::ok(format!(
            "no generator configured; {} records available",
            totals.inserted + totals.updated
        ))
    }
}
