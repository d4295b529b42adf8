//! The `http` transport: a small `axum` router exposing catalog CRUD,
//! manual execution, and execution listing as JSON, the way `bin/server`
//! reaches for `axum::Router` — minus leptos, minus OIDC, with a
//! presence/absence auth check instead of a real auth stack.

use crate::config::{HttpAuthKind, HttpConfig};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use claudecron_scheduler::{
    Engine, ExecutionFilter, ExecutionStatus, HookEvent, NewTask, SchedulerError, TaskFilter, TaskKind,
    TaskPatch, TriggerKind,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    auth: Arc<HttpAuthKind>,
    auth_token: Option<Arc<str>>,
    auth_header: Arc<str>,
}

/// Builds the router and serves it on `config.host:config.port` until the
/// process receives a shutdown signal.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn serve(
    engine: Arc<Engine>,
    config: &HttpConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let state = AppState {
        engine,
        auth: Arc::new(config.auth.kind),
        auth_token: config.auth.token.clone().map(Arc::from),
        auth_header: config.auth.header.clone().map_or_else(|| Arc::from("authorization"), Arc::from),
    };

    let app = Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:id", get(get_task).patch(update_task).delete(delete_task))
        .route("/tasks/:id/execute", post(execute_task))
        .route("/executions", get(list_executions))
        .route("/executions/:id", get(get_execution))
        .route("/executions/:id/progress", get(get_progress))
        .route("/hooks/:event", post(trigger_hook))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "http transport listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    authorized(&state.auth, state.auth_token.as_deref(), &state.auth_header, headers)
        .then_some(())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response())
}

/// Presence/absence-only check (§6): any scheme other than `none` just
/// compares a bearer-style token against a configurable header, with no
/// signature/claims validation.
fn authorized(kind: &HttpAuthKind, token: Option<&str>, header: &str, headers: &HeaderMap) -> bool {
    let expected = match (kind, token) {
        (HttpAuthKind::None, _) | (_, None) => return true,
        (_, Some(token)) => token,
    };
    let presented =
        headers.get(header).and_then(|v| v.to_str().ok()).map(|v| v.trim_start_matches("Bearer ").trim());
    presented == Some(expected)
}

fn error_response(err: SchedulerError) -> Response {
    let status = match &err {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::Handler(_) | SchedulerError::Storage(_) | SchedulerError::Transport(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new_task): Json<NewTask>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    match state.engine.create_task(new_task).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct ListTasksQuery {
    enabled: Option<bool>,
    kind: Option<TaskKind>,
    trigger_kind: Option<TriggerKind>,
    hook_event: Option<HookEvent>,
    name_contains: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListTasksQuery>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let filter = TaskFilter {
        enabled: query.enabled,
        kind: query.kind,
        trigger_kind: query.trigger_kind,
        hook_event: query.hook_event,
        name_contains: query.name_contains,
    };
    match state.engine.list_tasks(filter).await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_task(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(task_id) = id.parse() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid task id"}))).into_response();
    };
    match state.engine.get_task(&task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(task_id) = id.parse() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid task id"}))).into_response();
    };
    match state.engine.update_task(&task_id, patch).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_task(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(task_id) = id.parse() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid task id"}))).into_response();
    };
    match state.engine.delete_task(&task_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize, Default)]
struct ExecuteBody {
    #[serde(default)]
    override_conditions: bool,
}

async fn execute_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ExecuteBody>>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(task_id) = id.parse() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid task id"}))).into_response();
    };
    let override_conditions = body.map(|Json(b)| b.override_conditions).unwrap_or(false);
    match state.engine.execute(task_id, "manual", None, override_conditions).await {
        Ok(execution) => Json(execution).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct ListExecutionsQuery {
    task_id: Option<String>,
    status: Option<ExecutionStatus>,
    limit: Option<u32>,
}

async fn list_executions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListExecutionsQuery>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let task_id = match query.task_id.map(|v| v.parse()).transpose() {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid task_id"}))).into_response(),
    };
    let filter = ExecutionFilter {
        task_id,
        status: query.status,
        started_after: None,
        started_before: None,
        limit: query.limit,
    };
    match state.engine.list_executions(filter).await {
        Ok(executions) => Json(executions).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_execution(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(execution_id) = id.parse() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid execution id"}))).into_response();
    };
    match state.engine.get_execution(&execution_id).await {
        Ok(execution) => Json(execution).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_progress(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(execution_id) = id.parse() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid execution id"}))).into_response();
    };
    match state.engine.get_progress(&execution_id).await {
        Ok(execution) => Json(execution).into_response(),
        Err(err) => error_response(err),
    }
}

/// Test-only trigger-hook operation (§6): injects an externally-sourced
/// hook event with the request body as its trigger context.
async fn trigger_hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(event): Path<String>,
    body: Option<Json<serde_json::Map<String, serde_json::Value>>>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Ok(event) = claudecron_scheduler::HookEvent::parse(&event) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown hook event"}))).into_response();
    };
    let context = body.map(|Json(m)| m.into_iter().collect()).unwrap_or_default();
    state.engine.handle_hook_event(event, context).await;
    StatusCode::ACCEPTED.into_response()
}
