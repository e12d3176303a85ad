/// HTTP API Layer
///
/// This module provides the REST endpoints around the engine:
/// - Domain event intake and fan-out to matching automations
/// - Automation snapshot sync from the editor, with hot reload
/// - Manual test triggers
/// - Execution history for the UI

// Domain event intake
pub mod events;

// Snapshot sync and manual test triggers
pub mod automations;

// Execution history queries
pub mod executions;

use crate::automation::{registry::AutomationRegistry, storage::AutomationStorage};
use crate::recorder::ExecutionRecorder;
use crate::runtime::EventDispatcher;
use axum::Router;
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Automation snapshot persistence
    pub storage: AutomationStorage,
    /// Hot-reload registry for in-memory automations
    pub registry: Arc<AutomationRegistry>,
    /// Execution trail for history queries
    pub recorder: Arc<dyn ExecutionRecorder>,
    pub dispatcher: EventDispatcher,
}

/// All API routes, ready for `with_state`
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(events::create_event_routes())
        .merge(automations::create_automation_routes())
        .merge(executions::create_execution_routes())
}
