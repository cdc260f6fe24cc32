//! Trigger and status endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::models::{JobKind, JobRun, RecordSource, TriggerSource};
use crate::portal::create_portal;
use crate::services::{IngestOptions, IngestService};

/// Health check endpoint for schedulers and container probes.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Run-trigger parameters, accepted as query string or JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    pub kind: Option<String>,
}

/// POST /api/runs/:source — manually start a run for one source.
pub async fn trigger_manual(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(params): Query<RunParams>,
    headers: HeaderMap,
    body: Option<Json<RunParams>>,
) -> Response {
    let kind = params.kind.or(body.and_then(|Json(b)| b.kind));
    run_trigger(state, source, kind, headers, TriggerSource::Manual).await
}

/// GET /api/runs/:source/trigger — alias for scheduled invocations.
pub async fn trigger_scheduled(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(params): Query<RunParams>,
    headers: HeaderMap,
) -> Response {
    run_trigger(state, source, params.kind, headers, TriggerSource::Scheduled).await
}

async fn run_trigger(
    state: AppState,
    source: String,
    kind: Option<String>,
    headers: HeaderMap,
    trigger: TriggerSource,
) -> Response {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "missing or invalid trigger token" })),
        )
            .into_response();
    }

    let Some(source) = RecordSource::from_str(&source) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown source: {}", source) })),
        )
            .into_response();
    };

    let kind = match kind.as_deref() {
        None => JobKind::Recent,
        Some(s) => match JobKind::from_str(s) {
            Some(kind) => kind,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": format!("unknown kind: {}", s) })),
                )
                    .into_response();
            }
        },
    };

    let stale_after = state.settings.ingest.stale_after();
    match state.db.job_runs().find_active(source, stale_after).await {
        Ok(Some(active)) => {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "a run is already active for this source",
                    "run_id": active.id,
                })),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    }

    let portal = create_portal(source, &state.settings);
    let service = IngestService::new(state.db.clone(), portal, (*state.settings).clone());
    let options = match kind {
        JobKind::Full => IngestOptions::full(trigger),
        JobKind::Recent => IngestOptions::recent(trigger),
    };

    match service.run(options).await {
        Ok(run) => Json(run_summary(&run)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/runs/:source/latest — most recent run for one source.
pub async fn latest_run(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Response {
    let Some(source) = RecordSource::from_str(&source) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown source: {}", source) })),
        )
            .into_response();
    };

    match state.db.job_runs().find_latest(Some(source)).await {
        Ok(Some(run)) => Json(run_summary(&run)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no runs recorded for this source" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/status — store-level counts across both sources.
pub async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.db.records();
    let work_units = state.db.work_units();
    let failed_items = state.db.failed_items();
    let job_runs = state.db.job_runs();

    let mut sources = Vec::new();
    for source in [RecordSource::Contracts, RecordSource::Topics] {
        let count = records.count(Some(source)).await.unwrap_or(0);
        let quality = records
            .average_quality(Some(source))
            .await
            .ok()
            .flatten();
        let units = work_units.stats(Some(source)).await.unwrap_or_default();
        let failed = failed_items.count(Some(source)).await.unwrap_or(0);
        let latest = job_runs.find_latest(Some(source)).await.ok().flatten();

        sources.push(serde_json::json!({
            "source": source.as_str(),
            "records": count,
            "average_quality": quality,
            "units": {
                "pending": units.pending,
                "running": units.running,
                "completed": units.completed,
                "failed": units.failed,
            },
            "failed_items": failed,
            "latest_run": latest.map(|run| serde_json::json!({
                "run_id": run.id,
                "status": run.status.as_str(),
                "kind": run.kind.as_str(),
                "started_at": run.started_at.to_rfc3339(),
            })),
        }));
    }

    let total = records.count(None).await.unwrap_or(0);
    Json(serde_json::json!({
        "total_records": total,
        "sources": sources,
    }))
}

/// Check the request's bearer token against the configured trigger token.
///
/// An unset token rejects every trigger request.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.settings.server.trigger_token.as_deref() else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false)
}

/// JSON summary shared by the trigger response and the latest-run endpoint.
fn run_summary(run: &JobRun) -> serde_json::Value {
    serde_json::json!({
        "run_id": run.id,
        "source": run.source.as_str(),
        "kind": run.kind.as_str(),
        "trigger": run.trigger.as_str(),
        "status": run.status.as_str(),
        "totals": {
            "found": run.totals.found,
            "processed": run.totals.processed,
            "inserted": run.totals.inserted,
            "updated": run.totals.updated,
            "unchanged": run.totals.unchanged,
            "failed": run.totals.failed,
        },
        "units": {
            "total": run.units_total,
            "completed": run.units_completed,
        },
        "progress_percent": run.progress_percent(),
        "error": run.error,
        "duration_secs": run.duration().num_seconds(),
        "started_at": run.started_at.to_rfc3339(),
        "finished_at": run.finished_at.map(|dt| dt.to_rfc3339()),
        "log": run.log.tail(20),
    })
}
