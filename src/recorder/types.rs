/// Execution trail records
///
/// An `ExecutionRun` is one invocation of the executor; each visited node appends
/// one `ExecutionStep`. These records are the contract consumed by the
/// execution-history UI and by the deduplication guard.

use crate::automation::types::{Automation, DomainEvent, NodeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "completed_with_errors" => Some(RunStatus::CompletedWithErrors),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// Terminal success states; a run in one of these counts as "fired" for dedup
    pub fn is_fired(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::CompletedWithErrors)
    }

    /// Final status of a traversal that was not aborted, derived from its steps only
    pub fn derive(steps: &[ExecutionStep]) -> Self {
        if steps.iter().any(|step| step.status == StepStatus::Failed) {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(StepStatus::Succeeded),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

/// Counters persisted with the run header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_nodes: u32,
    pub total_edges: u32,
    pub nodes_visited: u32,
    pub actions_executed: u32,
    pub actions_succeeded: u32,
    pub actions_failed: u32,
    pub conditions_evaluated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: String,
    pub automation_id: String,
    pub automation_version: i64,
    pub tenant_id: String,
    pub trigger_type: String,
    pub entity_reference: String,
    pub correlation_id: String,
    pub status: RunStatus,
    /// Opened under the deduplication guard's at-most-once policy
    pub guarded: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metrics: RunMetrics,
    pub execution_time_ms: Option<i64>,
    pub error_message: Option<String>,
    /// Steps in traversal order; empty when only the header was loaded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ExecutionStep>,
}

impl ExecutionRun {
    /// New `running` run for this automation and event
    pub fn open(automation: &Automation, event: &DomainEvent, guarded: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            automation_id: automation.id.clone(),
            automation_version: automation.version,
            tenant_id: event.tenant_id.clone(),
            trigger_type: event.trigger_type.as_str().to_string(),
            entity_reference: event.entity_reference.clone(),
            correlation_id: event
                .correlation_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            status: RunStatus::Running,
            guarded,
            started_at: Utc::now(),
            completed_at: None,
            metrics: RunMetrics {
                total_nodes: automation.graph.nodes.len() as u32,
                total_edges: automation.graph.edges.len() as u32,
                ..RunMetrics::default()
            },
            execution_time_ms: None,
            error_message: None,
            steps: Vec::new(),
        }
    }
}

/// Tenant-scoped entity identity used for deduplication
///
/// Entity references are only unique within a tenant: two workspaces may both
/// have a user `42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub tenant_id: String,
    pub entity_reference: String,
}

impl EntityKey {
    pub fn new(tenant_id: impl Into<String>, entity_reference: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_reference: entity_reference.into(),
        }
    }
}

/// Request/response detail of an HTTP action step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpDetails {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub run_id: String,
    pub step_order: u32,
    pub node_id: String,
    pub node_kind: NodeKind,
    pub node_subtype: String,
    pub status: StepStatus,
    pub input_data: Value,
    pub output_data: Value,
    pub http: Option<HttpDetails>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}
