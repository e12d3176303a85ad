/// Execution history endpoints consumed by the history UI

use crate::api::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/automations/{id}/executions", get(list_executions))
        .route("/api/executions/{run_id}", get(get_execution))
}

/// GET /api/automations/{id}/executions?limit=50
/// Returns: { "executions": [run headers, newest first] }
async fn list_executions(
    State(state): State<AppState>,
    Path(automation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.recorder.list_runs(&automation_id, limit).await {
        Ok(runs) => Ok(Json(json!({ "executions": runs }))),
        Err(e) => {
            tracing::error!("Failed to list executions for {}: {}", automation_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/executions/{run_id}
/// Returns: the run header with all of its steps in order
async fn get_execution(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.recorder.get_run(&run_id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get execution {}: {}", run_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
