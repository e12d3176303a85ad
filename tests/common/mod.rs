//! Shared fixtures for radflow integration tests.
//!
//! Not every test file uses every helper, so unused-code warnings are
//! suppressed at the module level.

#![allow(dead_code)]

use async_trait::async_trait;
use radflow::automation::{
    storage::AutomationStorage, Automation, AutomationRegistry, AutomationStatus, EdgeDefinition,
    GraphDefinition, NodeDefinition, NodeKind,
};
use radflow::recorder::SqliteRecorder;
use radflow::runtime::{
    ActionInvoker, ActionOutcome, ActionRequest, ExecutorSettings, WorkflowExecutor,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Invoker that records every request and answers from a script keyed by URL substring
///
/// Unscripted URLs answer 200 with `{}`. A scripted status of 0 simulates a
/// transport error with no response.
#[derive(Default)]
pub struct FakeInvoker {
    requests: Mutex<Vec<ActionRequest>>,
    script: Mutex<HashMap<String, (u16, String)>>,
}

impl FakeInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url_contains: &str, status: u16, body: &str) {
        self.script
            .lock()
            .unwrap()
            .insert(url_contains.to_string(), (status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl ActionInvoker for FakeInvoker {
    async fn invoke(&self, request: &ActionRequest) -> ActionOutcome {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self
            .script
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| request.url.contains(key.as_str()))
            .map(|(_, answer)| answer.clone());
        let (status, body) = scripted.unwrap_or((200, "{}".to_string()));

        let latency = Duration::from_millis(1);
        match status {
            0 => ActionOutcome::failed(latency, None, "connection refused"),
            200..=299 => ActionOutcome {
                status_code: Some(status),
                latency,
                response_body: Some(body),
                error: None,
            },
            _ => ActionOutcome {
                status_code: Some(status),
                latency,
                response_body: Some(body),
                error: Some(format!("HTTP {}", status)),
            },
        }
    }
}

/// In-memory database, recorder and executor wired around a fake invoker
pub struct Harness {
    pub pool: SqlitePool,
    pub recorder: Arc<SqliteRecorder>,
    pub invoker: Arc<FakeInvoker>,
    pub executor: Arc<WorkflowExecutor>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(ExecutorSettings::default()).await
    }

    pub async fn with_settings(settings: ExecutorSettings) -> Self {
        let pool = radflow::db::connect_in_memory().await.unwrap();
        let recorder = Arc::new(SqliteRecorder::new(pool.clone()));
        recorder.init_schema().await.unwrap();
        let invoker = FakeInvoker::new();
        let executor = Arc::new(WorkflowExecutor::new(recorder.clone(), invoker.clone(), settings));
        Self {
            pool,
            recorder,
            invoker,
            executor,
        }
    }

    /// Registry over this harness's database, seeded with `automations`
    pub async fn registry(&self, automations: Vec<Automation>) -> Arc<AutomationRegistry> {
        let storage = AutomationStorage::new(self.pool.clone());
        storage.init_schema().await.unwrap();
        let registry = Arc::new(AutomationRegistry::new(storage));
        for automation in automations {
            registry.upsert(automation);
        }
        registry
    }
}

pub fn trigger(id: &str, subtype: &str) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        kind: NodeKind::Trigger,
        subtype: subtype.to_string(),
        config: Value::Null,
    }
}

pub fn condition(id: &str, expression: &str) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        kind: NodeKind::Condition,
        subtype: "expression".to_string(),
        config: json!({ "expression": expression }),
    }
}

pub fn action(id: &str, url: &str) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        kind: NodeKind::Action,
        subtype: "http-request".to_string(),
        config: json!({ "method": "POST", "url": url }),
    }
}

pub fn critical_action(id: &str, url: &str) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        kind: NodeKind::Action,
        subtype: "http-request".to_string(),
        config: json!({ "method": "POST", "url": url, "critical": true }),
    }
}

pub fn edge(source: &str, target: &str) -> EdgeDefinition {
    EdgeDefinition::new(source, target)
}

pub fn branch(source: &str, target: &str, label: &str) -> EdgeDefinition {
    EdgeDefinition::labelled(source, target, label)
}

pub fn automation(
    id: &str,
    tenant: &str,
    nodes: Vec<NodeDefinition>,
    edges: Vec<EdgeDefinition>,
) -> Automation {
    let trigger_type = nodes
        .iter()
        .find(|node| node.kind == NodeKind::Trigger)
        .map(|node| node.subtype.clone())
        .unwrap_or_default();
    Automation {
        id: id.to_string(),
        tenant_id: tenant.to_string(),
        name: format!("automation {}", id),
        trigger_type,
        status: AutomationStatus::Active,
        graph: GraphDefinition { nodes, edges },
        version: 1,
    }
}
