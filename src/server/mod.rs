//! HTTP trigger server for starting runs and reading store status.
//!
//! Exposes the run triggers (a manual POST and the scheduled GET alias, both
//! gated by the configured bearer token), the latest-run summary per source,
//! store-level status, and a health probe. Trigger requests execute the run
//! inline and respond with its JSON summary.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::repository::DbContext;

/// Shared state for the trigger server.
#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let db = settings.create_db_context()?;
        Ok(Self {
            db,
            settings: Arc::new(settings),
        })
    }
}

/// Start the trigger server.
pub async fn serve(settings: Settings, bind: &str) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let state = AppState::new(settings)?;
    state.db.init_schema().await?;
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("trigger server listening at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::models::{JobKind, JobRun, JobStatus, RecordSource, TriggerSource};

    async fn setup_test_app(token: Option<&str>) -> (axum::Router, DbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.database_url = None;
        settings.server.trigger_token = token.map(|t| t.to_string());

        let db = DbContext::new(&settings.database_path());
        db.init_schema().await.unwrap();

        let state = AppState {
            db: db.clone(),
            settings: Arc::new(settings),
        };
        (create_router(state), db, dir)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        let (app, _db, _dir) = setup_test_app(Some("secret")).await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trigger_without_token_unauthorized() {
        let (app, _db, _dir) = setup_test_app(Some("secret")).await;
        let response = app.oneshot(post("/api/runs/topics", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trigger_with_wrong_token_unauthorized() {
        let (app, _db, _dir) = setup_test_app(Some("secret")).await;
        let response = app
            .oneshot(post("/api/runs/topics", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trigger_locked_when_no_token_configured() {
        let (app, _db, _dir) = setup_test_app(None).await;
        let response = app
            .oneshot(post("/api/runs/topics", Some("anything")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trigger_unknown_source() {
        let (app, _db, _dir) = setup_test_app(Some("secret")).await;
        let response = app
            .oneshot(post("/api/runs/nonsense", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trigger_conflicts_with_active_run() {
        let (app, db, _dir) = setup_test_app(Some("secret")).await;

        let mut active = JobRun::new(RecordSource::Topics, JobKind::Recent, TriggerSource::Cli);
        active.status = JobStatus::Running;
        db.job_runs().save(&active).await.unwrap();

        let response = app
            .oneshot(post("/api/runs/topics", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let json = body_json(response).await;
        assert_eq!(json["run_id"], active.id);
    }

    #[tokio::test]
    async fn test_latest_run_not_found_when_empty() {
        let (app, _db, _dir) = setup_test_app(Some("secret")).await;
        let response = app.oneshot(get("/api/runs/topics/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_latest_run_reports_summary() {
        let (app, db, _dir) = setup_test_app(Some("secret")).await;

        let mut run = JobRun::new(RecordSource::Topics, JobKind::Full, TriggerSource::Manual);
        run.status = JobStatus::Completed;
        run.totals.found = 12;
        run.totals.inserted = 10;
        run.log.push("sweep completed");
        db.job_runs().save(&run).await.unwrap();

        let response = app.oneshot(get("/api/runs/topics/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["run_id"], run.id);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["totals"]["found"], 12);
        assert_eq!(json["totals"]["inserted"], 10);
        assert!(!json["log"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_empty_store() {
        let (app, _db, _dir) = setup_test_app(Some("secret")).await;
        let response = app.oneshot(get("/api/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["total_records"], 0);
        assert_eq!(json["sources"].as_array().unwrap().len(), 2);
    }
}
