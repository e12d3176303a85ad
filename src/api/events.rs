/// Domain event intake
///
/// CRUD handlers, payment callbacks and other collaborators post events here; each
/// event is dispatched to every active automation of its tenant that listens for it.

use crate::api::AppState;
use crate::automation::types::DomainEvent;
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde_json::{json, Value};

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/api/events", post(receive_event))
}

/// Dispatch a domain event
///
/// POST /api/events
/// Body: { "trigger_type": "user-expired", "tenant_id": "...", "entity_reference": "...", "context": { ... } }
/// Returns: { "correlation_id": "...", "runs": [...] }
async fn receive_event(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    // Parsed by hand so an unknown trigger_type is a 400, not axum's 422
    let event: DomainEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("❌ Rejected domain event: {}", e);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    if event.tenant_id.trim().is_empty() || event.entity_reference.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    tracing::info!(
        "📥 Domain event {} for '{}' (tenant '{}')",
        event.trigger_type,
        event.entity_reference,
        event.tenant_id
    );

    let runs = state.dispatcher.dispatch(event).await;
    let correlation_id = runs.first().map(|run| run.correlation_id.clone());

    Ok(Json(json!({
        "correlation_id": correlation_id,
        "matched": runs.len(),
        "runs": runs,
    })))
}
