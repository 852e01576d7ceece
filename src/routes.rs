use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use health_checker::{
    execute_and_record, CheckDefinition, CheckExecutor, CheckStore, ExecutionRecord,
    ExecutionResult, JobScheduler, NewCheckDefinition, ProbeSpec, SchedulerHealth,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;

const DEFAULT_HISTORY_LIMIT: u32 = 10;
const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CheckStore>,
    pub executor: Arc<CheckExecutor>,
    pub scheduler: JobScheduler,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    db: &'static str,
    scheduler: SchedulerHealth,
    checked_at: DateTime<Utc>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run-check", post(run_check))
        .route("/checks", get(list_checks).post(create_check))
        .route("/checks/:id", get(get_check).delete(delete_check))
        .route("/checks/:id/history", get(check_history))
        .route("/checks/:id/run", post(run_stored_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "Database ping failed");
            "error"
        }
    };
    Json(HealthResponse {
        db,
        scheduler: state.scheduler.health().await,
        checked_at: Utc::now(),
    })
}

async fn run_check(
    State(state): State<AppState>,
    Json(spec): Json<ProbeSpec>,
) -> Result<Json<ExecutionResult>, ApiError> {
    spec.validate()?;
    Ok(Json(state.executor.execute(&spec).await))
}

async fn list_checks(
    State(state): State<AppState>,
) -> Result<Json<Vec<CheckDefinition>>, ApiError> {
    Ok(Json(state.store.list_checks().await?))
}

async fn create_check(
    State(state): State<AppState>,
    Json(new_check): Json<NewCheckDefinition>,
) -> Result<(StatusCode, Json<CheckDefinition>), ApiError> {
    let definition = state.store.create_check(&new_check).await?;
    state.scheduler.schedule_job(&definition).await;
    info!(check_id = definition.id, name = %definition.name, "Check created");
    Ok((StatusCode::CREATED, Json(definition)))
}

async fn get_check(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CheckDefinition>, ApiError> {
    Ok(Json(find_check(&state, id).await?))
}

async fn delete_check(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_check(id).await? {
        return Err(not_found(id));
    }
    state.scheduler.unschedule_job(id).await;
    info!(check_id = id, "Check deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn check_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    find_check(&state, id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.store.check_history(id, limit).await?))
}

async fn run_stored_check(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let definition = find_check(&state, id).await?;
    let record = execute_and_record(state.store.as_ref(), &state.executor, &definition).await?;
    Ok(Json(record))
}

async fn find_check(state: &AppState, id: i64) -> Result<CheckDefinition, ApiError> {
    state.store.get_check(id).await?.ok_or_else(|| not_found(id))
}

fn not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("check {id} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use health_checker::{
        MockCheckStore, MockHttpClient, MockSchedulerLock, RetryPolicy, SchedulerSettings,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const PROBE_URL: &str = "http://probe.example.com/status";

    struct TestApp {
        router: Router,
        store: Arc<MockCheckStore>,
        scheduler: JobScheduler,
    }

    async fn create_test_app() -> TestApp {
        let store = Arc::new(MockCheckStore::new());
        let http = MockHttpClient::new().with_response(
            PROBE_URL,
            200,
            r#"{"status": "ok", "data": {"id": 3}}"#,
        );
        let executor = Arc::new(CheckExecutor::new(Arc::new(http), RetryPolicy::default()));
        let scheduler = JobScheduler::new(
            store.clone(),
            executor.clone(),
            Arc::new(MockSchedulerLock::granted()),
            SchedulerSettings::default(),
        );
        scheduler.start().await;

        let router = router(AppState {
            store: store.clone(),
            executor,
            scheduler: scheduler.clone(),
        });
        TestApp {
            router,
            store,
            scheduler,
        }
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn new_check_body(name: &str) -> Value {
        json!({
            "name": name,
            "url": PROBE_URL,
            "required_fields": ["status", "data.id"],
            "interval_minutes": 2
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_check_returns_result() {
        let app = create_test_app().await;

        let (status, body) = send(
            &app.router,
            "POST",
            "/run-check",
            Some(json!({"url": PROBE_URL, "required_fields": ["status", "data.name"]})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "FAIL");
        assert_eq!(body["missing_fields"], json!(["data.name"]));
        assert_eq!(body["status_code"], 200);
        assert!(body["error"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_check_rejects_invalid_url() {
        let app = create_test_app().await;

        let (status, body) = send(
            &app.router,
            "POST",
            "/run-check",
            Some(json!({"url": "ftp://example.com", "required_fields": []})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_check_schedules_job() {
        let app = create_test_app().await;

        let (status, body) = send(&app.router, "POST", "/checks", Some(new_check_body("probe"))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "probe");
        assert_eq!(body["expected_status_code"], 200);
        let jobs = app.scheduler.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].check_id, body["id"].as_i64().unwrap());
        app.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_check_rejects_duplicates_and_invalid_input() {
        let app = create_test_app().await;
        send(&app.router, "POST", "/checks", Some(new_check_body("probe"))).await;

        let (status, _) = send(&app.router, "POST", "/checks", Some(new_check_body("probe"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut invalid = new_check_body("other");
        invalid["interval_minutes"] = json!(0);
        let (status, _) = send(&app.router, "POST", "/checks", Some(invalid)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(app.scheduler.jobs().await.len(), 1);
        app.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_and_list_checks() {
        let app = create_test_app().await;
        let (_, created) = send(&app.router, "POST", "/checks", Some(new_check_body("probe"))).await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(&app.router, "GET", &format!("/checks/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, created);

        let (status, body) = send(&app.router, "GET", "/checks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([created]));

        let (status, _) = send(&app.router, "GET", "/checks/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        app.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_check_unschedules_job() {
        let app = create_test_app().await;
        let (_, created) = send(&app.router, "POST", "/checks", Some(new_check_body("probe"))).await;
        let id = created["id"].as_i64().unwrap();

        let (status, _) = send(&app.router, "DELETE", &format!("/checks/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.scheduler.jobs().await.is_empty());

        let (status, _) = send(&app.router, "DELETE", &format!("/checks/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        app.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stored_check_and_history() {
        let app = create_test_app().await;
        let (_, created) = send(&app.router, "POST", "/checks", Some(new_check_body("probe"))).await;
        let id = created["id"].as_i64().unwrap();

        for _ in 0..3 {
            let (status, body) = send(&app.router, "POST", &format!("/checks/{id}/run"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "PASS");
            assert_eq!(body["check_id"], id);
        }
        assert_eq!(app.store.executions_for(id).len(), 3);

        let (status, body) =
            send(&app.router, "GET", &format!("/checks/{id}/history?limit=2"), None).await;
        assert_eq!(status, StatusCode::OK);
        let history = body.as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0]["id"].as_i64() > history[1]["id"].as_i64());

        let (status, body) = send(&app.router, "GET", &format!("/checks/{id}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, _) = send(&app.router, "GET", "/checks/999/history", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app.router, "POST", "/checks/999/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        app.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_store_outage() {
        let app = create_test_app().await;

        let (status, body) = send(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db"], "ok");
        assert_eq!(body["scheduler"]["running"], true);
        assert_eq!(body["scheduler"]["job_count"], 0);

        app.store.set_unreachable(true);
        let (status, body) = send(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db"], "error");
        assert_eq!(body["scheduler"]["jobstore_reachable"], false);
        assert!(body["scheduler"]["job_count"].is_null());
        app.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_is_generic_500() {
        let app = create_test_app().await;
        app.store.set_unreachable(true);

        let (status, body) = send(&app.router, "GET", "/checks", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");
        app.scheduler.stop().await;
    }
}
