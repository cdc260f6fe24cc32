//! Bounded-concurrency detail enrichment.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::portal::{EnrichedRecord, Portal, PortalError, RecordStub};

/// Result of enriching one stub.
pub(crate) enum EnrichOutcome {
    Enriched(Box<EnrichedRecord>),
    Failed {
        external_id: String,
        error: PortalError,
    },
}

/// Enrich a page of stubs through a bounded pool of concurrent fetches.
///
/// Outcomes come back in stub order. A failed enrichment carries the stub's
/// identity so the caller can park it for retry.
pub(crate) async fn enrich_stubs(
    portal: &Arc<dyn Portal>,
    stubs: Vec<RecordStub>,
    workers: usize,
) -> Vec<EnrichOutcome> {
    stream::iter(stubs.into_iter().map(|stub| {
        let portal = Arc::clone(portal);
        async move {
            let external_id = stub.external_id.clone();
            match portal.enrich(stub).await {
                Ok(enriched) => EnrichOutcome::Enriched(Box::new(enriched)),
                Err(error) => EnrichOutcome::Failed { external_id, error },
            }
        }
    }))
    .buffered(workers.max(1))
    .collect()
    .await
}
