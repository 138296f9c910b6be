//! HTTP intake for completion events, job records and submissions.
//!
//! Provides:
//! - `/health` - Basic daemon health check
//! - `/api/events` - Completion events from the runner listener
//! - `/api/patterns` - Job record registration and listing
//! - `/api/submissions` - Store and submit a job definition
//! - `/api/submissions/{id}` - Look up a stored submission

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use harvest_common::{InboundEvent, NewJobRecord, NewSubmission};
use serde_json::json;
use tracing::{info, warn};

use crate::connector::RunnerConnector;
use crate::errors::HarvestError;
use crate::orchestrator::Orchestrator;
use crate::store::JobStore;
use crate::submission;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<JobStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub connector: Arc<dyn RunnerConnector>,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: Instant,
}

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/events", post(event_handler))
        .route("/api/patterns", post(register_handler).get(list_handler))
        .route("/api/submissions", post(submission_handler))
        .route("/api/submissions/{id}", get(submission_lookup_handler))
        .with_state(Arc::new(state))
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let uptime = Duration::from_secs(state.started_at.elapsed().as_secs());
    let active = state.store.records().iter().filter(|r| r.active).count();

    Json(json!({
        "status": "healthy",
        "version": state.version,
        "uptime": humantime::format_duration(uptime).to_string(),
        "active_records": active,
    }))
}

/// Accepts the event and harvests in the background.
async fn event_handler(
    State(state): State<Arc<HttpState>>,
    Json(event): Json<InboundEvent>,
) -> impl IntoResponse {
    let job_id = event.payload.job_identifier().to_string();
    info!(job_id = %job_id, status = %event.payload.status, uuid = %event.uuid, "event received");

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.handle_event(&event).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "job_id": job_id })),
    )
}

/// Registration answers 201 for new and already registered records alike.
async fn register_handler(
    State(state): State<Arc<HttpState>>,
    Json(new): Json<NewJobRecord>,
) -> Response {
    match state.store.register(new) {
        Ok((record, _created)) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn list_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.store.records())
}

async fn submission_handler(
    State(state): State<Arc<HttpState>>,
    Json(new): Json<NewSubmission>,
) -> Response {
    let request = match state.store.add_submission(new) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };
    match submission::submit(&state.store, state.connector.as_ref(), request.id).await {
        Ok((request, record)) => (
            StatusCode::CREATED,
            Json(json!({ "submission": request, "record": record })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn submission_lookup_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<u64>,
) -> Response {
    match state.store.submission(id) {
        Some(request) => Json(request).into_response(),
        None => error_response(&HarvestError::NotFound(format!("submission {id}"))),
    }
}

fn error_status(e: &HarvestError) -> StatusCode {
    match e {
        HarvestError::SubmissionConsumed(_) => StatusCode::CONFLICT,
        HarvestError::NotFound(_) => StatusCode::NOT_FOUND,
        HarvestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(e: &HarvestError) -> Response {
    let status = error_status(e);
    let code = e.code();
    warn!(code = %code.code_string(), error = %e, status = status.as_u16(), "request failed");
    (
        status,
        Json(json!({
            "error": e.to_string(),
            "code": code.code_string(),
            "remediation": code.entry().remediation,
        })),
    )
        .into_response()
}

/// Start the HTTP server.
///
/// # Returns
/// A handle to the spawned server task.
pub async fn start_server(
    listener: tokio::net::TcpListener,
    state: HttpState,
) -> tokio::task::JoinHandle<Result<(), std::io::Error>> {
    let router = create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP intake listening");
    }

    tokio::spawn(async move { axum::serve(listener, router).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::StaticConnector;
    use crate::orchestrator::testing::RecordingSink;
    use axum::body::Body;
    use axum::http::Request;
    use harvest_common::testing::init_test_logging;
    use harvest_miner::mock::{Canned, FakeVcs, MockRunner};
    use serde_json::Value;
    use tower::ServiceExt;

    const RUNNER: &str = "https://validation.example.org/RPC2/";

    struct TestApp {
        state: HttpState,
        runner: Arc<MockRunner>,
        _repos: tempfile::TempDir,
    }

    fn make_test_app() -> TestApp {
        init_test_logging();
        let store = Arc::new(JobStore::new());
        let runner = Arc::new(MockRunner::new(RUNNER));
        let connector: Arc<dyn RunnerConnector> = Arc::new(StaticConnector {
            runner: runner.clone(),
        });
        let repos = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            connector.clone(),
            Arc::new(RecordingSink::default()),
            Arc::new(FakeVcs::new()),
            repos.path(),
        ));
        TestApp {
            state: HttpState {
                store,
                orchestrator,
                connector,
                version: "0.1.0-test",
                started_at: Instant::now(),
            },
            runner,
            _repos: repos,
        }
    }

    async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = create_router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn pattern(job_id: Value) -> Value {
        json!({
            "runner_url": RUNNER,
            "job_id": job_id,
            "build": "qa/linux-mainline/v6.1",
            "build_url": "https://ci.example.org/job/1/",
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = make_test_app();
        let (status, json) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0-test");
        assert_eq!(json["active_records"], 0);
    }

    #[tokio::test]
    async fn test_register_pattern_is_idempotent() {
        let app = make_test_app();
        let (status, first) = send(&app, "POST", "/api/patterns", Some(pattern(json!(4242)))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["job_id"], "4242");
        assert_eq!(first["requester"], "anonymous");
        assert_eq!(first["active"], true);

        let (status, again) = send(&app, "POST", "/api/patterns", Some(pattern(json!("4242")))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(again["id"], first["id"]);

        let (status, list) = send(&app, "GET", "/api/patterns", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_build_coordinate_is_rejected() {
        let app = make_test_app();
        let mut body = pattern(json!(1));
        body["build"] = json!("not-a-coordinate");
        let (status, _) = send(&app, "POST", "/api/patterns", Some(body)).await;
        assert!(status.is_client_error());
        assert!(app.state.store.records().is_empty());
    }

    #[tokio::test]
    async fn test_event_is_accepted() {
        let app = make_test_app();
        let event = json!({
            "uuid": "e-1",
            "timestamp": "2026-10-19T10:00:00Z",
            "username": "lava",
            "payload": {"job": 77, "sub_id": "77.0", "status": "Complete", "pipeline": false},
        });
        let (status, json) = send(&app, "POST", "/api/events", Some(event)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["job_id"], "77.0");
    }

    #[tokio::test]
    async fn test_submission_flow() {
        let app = make_test_app();
        app.runner.set_submit_response(Canned::Ok("5001".into()));
        let body = json!({
            "definition": "{\"job_name\": \"boot\"}",
            "runner_url": RUNNER,
            "build": "qa/linux-mainline/v6.1",
            "build_url": "https://ci.example.org/job/1/",
            "requester": "ci",
        });

        let (status, json) = send(&app, "POST", "/api/submissions", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["submission"]["submitted"], true);
        assert_eq!(json["record"]["job_id"], "5001");

        let id = json["submission"]["id"].as_u64().unwrap();
        let (status, lookup) = send(&app, "GET", &format!("/api/submissions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lookup["job_id"], "5001");
        let (status, _) = send(&app, "GET", "/api/submissions/9999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.runner.set_submit_response(Canned::Unavailable);
        let (status, json) = send(&app, "POST", "/api/submissions", Some(body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "HRV-E100");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&HarvestError::SubmissionConsumed(1)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&HarvestError::MissingCredentials {
                netloc: "runner".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&HarvestError::NotFound("submission 1".into())),
            StatusCode::NOT_FOUND
        );
    }
}
