//! Axum handlers for the task control surface.

use crate::error::{ApiError, ApiResult};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use deskpilot_core::{Orchestrator, TaskHandle, TaskRequest, TaskSnapshot, TaskStatus};
use deskpilot_desktop::{CaptureSettings, ImageFormat, Screenshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

pub const SERVICE_NAME: &str = "Deskpilot";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    api_key: Arc<str>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            orchestrator,
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default = "default_confirm")]
    pub confirm: bool,
}

fn default_confirm() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScreenshotResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    pub screenshot: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/task", post(create_task))
        .route("/task/{id}", get(get_task))
        .route("/task/{id}/stop", post(stop_task))
        .route("/task/{id}/confirm", post(confirm_task))
        .route("/task/{id}/screenshot", get(task_screenshot))
        .route("/screenshot", get(screenshot))
        .layer(from_fn_with_state(state.clone(), require_api_key))
        .layer(from_fn(request_log_middleware))
        .with_state(state)
}

async fn request_log_middleware(request: Request, next: Next) -> Response {
    debug!("{} {}", request.method(), request.uri().path());
    next.run(request).await
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token_matches(token, &state.api_key) => Ok(next.run(request).await),
        _ => Err(ApiError::unauthorized("Invalid API Key")),
    }
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Unparseable ids cannot name a task.
async fn find_task(state: &AppState, id: &str) -> ApiResult<Arc<TaskHandle>> {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::not_found("Task not found"))?;
    Ok(state.orchestrator.get(id).await?)
}

fn png_data_url(shot: &Screenshot, capture: &CaptureSettings) -> ApiResult<String> {
    let settings = CaptureSettings {
        format: ImageFormat::Png,
        ..capture.clone()
    };
    shot.to_data_url(&settings)
        .map_err(|e| ApiError::internal(e.to_string()))
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

pub async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<Json<CreateTaskResponse>> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let task = state.orchestrator.submit(request).await?;
    Ok(Json(CreateTaskResponse {
        task_id: task.id(),
        status: TaskStatus::Pending,
        message: "Task created successfully".into(),
    }))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskSnapshot>> {
    let task = find_task(&state, &id).await?;
    Ok(Json(task.snapshot()))
}

pub async fn stop_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let task = find_task(&state, &id).await?;
    let message = state.orchestrator.stop(task.id()).await?;
    Ok(Json(MessageResponse { message }))
}

pub async fn confirm_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let task = find_task(&state, &id).await?;
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let message = state
        .orchestrator
        .confirm(task.id(), request.confirm)
        .await?;
    Ok(Json(MessageResponse { message }))
}

pub async fn task_screenshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScreenshotResponse>> {
    let task = find_task(&state, &id).await?;
    let shot = state.orchestrator.capture().await?;
    Ok(Json(ScreenshotResponse {
        success: true,
        task_id: Some(task.id()),
        status: Some(task.status()),
        screenshot: png_data_url(&shot, &state.orchestrator.config().capture)?,
    }))
}

pub async fn screenshot(State(state): State<AppState>) -> ApiResult<Json<ScreenshotResponse>> {
    let shot = state.orchestrator.capture().await?;
    Ok(Json(ScreenshotResponse {
        success: true,
        task_id: None,
        status: None,
        screenshot: png_data_url(&shot, &state.orchestrator.config().capture)?,
    }))
}
