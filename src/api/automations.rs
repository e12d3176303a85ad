/// Automation snapshot sync and manual test triggers
///
/// Authoring happens in the editor; it pushes each saved automation here so the
/// engine's registry is hot-reloaded with zero downtime.

use crate::api::AppState;
use crate::automation::{
    graph::CompiledGraph,
    types::{Automation, ContextMap, DomainEvent, TriggerKind},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for a manual test run; every field is optional
#[derive(Debug, Default, Deserialize)]
pub struct TestRunRequest {
    pub trigger_type: Option<TriggerKind>,
    pub entity_reference: Option<String>,
    #[serde(default)]
    pub context: ContextMap,
}

pub fn create_automation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/automations/{id}", put(sync_automation))
        .route("/api/automations/{id}", delete(delete_automation))
        .route("/api/automations/{id}/test", post(test_automation))
}

/// Store an automation snapshot and hot-reload it
///
/// PUT /api/automations/{id}
/// Body: { "tenant_id": "...", "name": "...", "trigger_type": "...", "status": "active", "graph": { ... }, "version": 3 }
async fn sync_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let mut payload: Value = serde_json::from_str(&body).map_err(|e| {
        tracing::warn!("❌ Invalid automation payload for {}: {}", id, e);
        StatusCode::BAD_REQUEST
    })?;
    if let Some(object) = payload.as_object_mut() {
        // The URL parameter is authoritative
        object.insert("id".to_string(), json!(id));
    }
    let automation: Automation = serde_json::from_value(payload).map_err(|e| {
        tracing::warn!("❌ Invalid automation payload for {}: {}", id, e);
        StatusCode::BAD_REQUEST
    })?;

    if automation.tenant_id.trim().is_empty() || automation.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Err(e) = CompiledGraph::compile(&automation.graph) {
        tracing::warn!("❌ Rejected automation {} with invalid graph: {}", id, e);
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    if let Err(e) = state.storage.save_automation(&automation).await {
        tracing::error!("Failed to save automation {}: {}", id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = state.registry.reload_automation(&id).await {
        tracing::error!("Failed to reload automation {} into registry: {}", id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("🔥 Synced automation: {} ({}) v{}", id, automation.name, automation.version);

    Ok(Json(json!({
        "id": id,
        "version": automation.version,
        "message": format!("Automation '{}' synced", automation.name),
    })))
}

/// DELETE /api/automations/{id}
async fn delete_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.storage.delete_automation(&id).await {
        Ok(true) => {
            state.registry.remove_automation(&id);
            Ok(Json(json!({ "message": format!("Automation '{}' deleted", id) })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete automation {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Run one automation immediately, whatever its status
///
/// POST /api/automations/{id}/test
/// Body (optional): { "trigger_type": "user-expired", "entity_reference": "...", "context": { ... } }
/// Without a trigger_type the automation's own trigger is used, falling back to "manual".
async fn test_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let request: TestRunRequest = if body.trim().is_empty() {
        TestRunRequest::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid test request for {}: {}", id, e);
            StatusCode::BAD_REQUEST
        })?
    };

    let Some(automation) = state.registry.get(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };

    let trigger = request
        .trigger_type
        .or_else(|| TriggerKind::parse(&automation.trigger_type))
        .or_else(|| automation.trigger_subtypes().find_map(TriggerKind::parse))
        .unwrap_or(TriggerKind::Manual);
    let entity_reference = request
        .entity_reference
        .unwrap_or_else(|| "manual-test".to_string());

    let mut event = DomainEvent::new(trigger, automation.tenant_id.clone(), entity_reference);
    event.context = request.context;

    tracing::info!("🧪 Manual test of automation {} with {}", id, trigger);
    let run = state.dispatcher.executor().execute(&automation, &event).await;

    Ok(Json(json!(run)))
}
