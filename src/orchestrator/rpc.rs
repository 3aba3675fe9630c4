//! Agent-facing RPC server: JSON request/response over the `/internal`
//! routes. Three calls, mirroring the service surface agents need:
//! lease a task, submit an outcome, read a dependency result.

use crate::{
    models::{Task, TaskOutcome},
    orchestrator::OrchestratorService,
    DagcalcError,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// Wire form of a leased task.
///
/// The operation travels as its string form so an agent built against a
/// newer operation set reports `unknown_operation` instead of failing to
/// decode the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    pub operation: String,
    pub arg1: f64,
    pub arg2: f64,
    pub arg1_from_dep: bool,
    pub arg2_from_dep: bool,
    pub operation_time_ms: u64,
    pub depends_on: Vec<String>,
    pub user_login: String,
}

impl From<Task> for TaskPayload {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            operation: task.operation.as_str().to_string(),
            arg1: task.arg1,
            arg2: task.arg2,
            arg1_from_dep: task.arg1_from_dep,
            arg2_from_dep: task.arg2_from_dep,
            operation_time_ms: task.operation_time_ms,
            depends_on: task.depends_on,
            user_login: task.user_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultRequest {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResultResponse {
    pub task_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
}

pub fn rpc_router(service: Arc<OrchestratorService>) -> Router {
    Router::new()
        .route("/task", get(get_task))
        .route("/task/result", post(submit_result))
        .route("/task/{task_id}/result", get(get_task_result))
        .with_state(service)
}

async fn get_task(
    State(service): State<Arc<OrchestratorService>>,
) -> std::result::Result<Json<TaskPayload>, (StatusCode, Json<Value>)> {
    match service.get_task().await {
        Ok(Some(task)) => {
            debug!("dispatching task {}", task.id);
            Ok(Json(TaskPayload::from(task)))
        }
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no tasks available"})),
        )),
        Err(err) => {
            error!("task dispatch failed: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            ))
        }
    }
}

async fn submit_result(
    State(service): State<Arc<OrchestratorService>>,
    Json(request): Json<SubmitResultRequest>,
) -> std::result::Result<Json<SubmitResultResponse>, (StatusCode, Json<Value>)> {
    match service.submit_result(&request.task_id, request.outcome).await {
        Ok(success) => Ok(Json(SubmitResultResponse { success })),
        Err(DagcalcError::NotFound(what)) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("{what} not found")})),
        )),
        Err(err) => {
            error!("result submission failed: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            ))
        }
    }
}

async fn get_task_result(
    State(service): State<Arc<OrchestratorService>>,
    Path(task_id): Path<String>,
) -> std::result::Result<Json<TaskResultResponse>, (StatusCode, Json<Value>)> {
    match service.get_task_result(&task_id).await {
        Ok(result) => Ok(Json(TaskResultResponse {
            task_exists: result.is_some(),
            result,
        })),
        Err(err) => {
            error!("task result lookup failed: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            ))
        }
    }
}
