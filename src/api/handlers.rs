use super::demo;
use super::error::ApiError;
use super::state::AppState;
use crate::queue::{TaskHandle, TaskRecord};
use crate::tasks::{TaskArgs, TaskInfo};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_PERFORMANCE_DAYS: u32 = 30;
const MAX_PERFORMANCE_DAYS: u32 = 365;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": state.settings.app_version,
        "demo_mode": state.settings.demo_mode,
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let settings = &state.settings;

    let broker = match state.queue.broker().pending_count().await {
        Ok(pending) => json!({ "status": "healthy", "pending_tasks": pending }),
        Err(e) => {
            tracing::warn!("Broker unreachable during health check: {}", e);
            json!({ "status": "unavailable" })
        }
    };

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": settings.app_version,
        "demo_mode": settings.demo_mode,
        "uptime_seconds": state.uptime_secs(),
        "components": {
            "api": { "status": "healthy" },
            "task_queue": broker,
            "registered_tasks": state.queue.registry().len(),
        },
        "features": {
            "ai_tasks": settings.enable_ai_tasks,
            "sentiment_analysis": settings.enable_sentiment_analysis,
            "auto_rebalancing": settings.enable_auto_rebalancing,
        },
    }))
}

pub async fn dashboard_stats(State(state): State<AppState>) -> ApiResult<demo::DashboardStats> {
    Ok(Json(demo::dashboard_stats(state.settings.portfolio_baseline_value)))
}

pub async fn refresh_dashboard(State(state): State<AppState>) -> ApiResult<demo::RefreshPayload> {
    let payload = demo::refresh(
        &mut rand::thread_rng(),
        state.settings.portfolio_baseline_value,
        state.settings.portfolio_jitter,
    );

    tracing::debug!(portfolio_value = payload.portfolio_value, "Dashboard refreshed");

    Ok(Json(payload))
}

pub async fn ai_insights() -> ApiResult<Value> {
    Ok(Json(demo::ai_insights()))
}

pub async fn portfolio_allocations(State(state): State<AppState>) -> ApiResult<Vec<demo::Allocation>> {
    Ok(Json(demo::allocations(state.settings.portfolio_baseline_value)))
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub days: Option<u32>,
}

pub async fn portfolio_performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> ApiResult<Vec<demo::PerformancePoint>> {
    let days = query
        .days
        .unwrap_or(DEFAULT_PERFORMANCE_DAYS)
        .clamp(1, MAX_PERFORMANCE_DAYS);

    Ok(Json(demo::performance(
        &mut rand::thread_rng(),
        days,
        state.settings.portfolio_baseline_value,
        state.settings.portfolio_jitter,
    )))
}

pub async fn etf_opportunities() -> ApiResult<Value> {
    Ok(Json(demo::etf_opportunities()))
}

pub async fn etf_universe() -> ApiResult<Value> {
    Ok(Json(demo::etf_universe()))
}

pub async fn etf_analysis(Path(symbol): Path<String>) -> ApiResult<Value> {
    Ok(Json(demo::etf_analysis(&symbol)))
}

pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<Vec<TaskInfo>> {
    Ok(Json(state.queue.registry().list()))
}

/// Body of `POST /api/tasks/:task`, both fields optional
#[derive(Debug, Default, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

pub async fn enqueue_task(
    State(state): State<AppState>,
    Path(task): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<TaskHandle>), ApiError> {
    // No body means no arguments; anything else must be a valid request
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        EnqueueRequest::default()
    } else {
        serde_json::from_slice::<EnqueueRequest>(&body)
            .map_err(|e| ApiError::InvalidBody(e.to_string()))?
    };
    let args = TaskArgs {
        args: request.args,
        kwargs: request.kwargs,
    };

    let handle = state.queue.enqueue(&task, args).await?;

    Ok((StatusCode::ACCEPTED, Json(handle)))
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<TaskRecord> {
    let not_found = || ApiError::NotFound(format!("Task not found: {}", task));

    let task_id = Uuid::parse_str(&task).map_err(|_| not_found())?;

    state
        .queue
        .status(task_id)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}
