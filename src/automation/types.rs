/// Core automation type definitions
///
/// Defines automations, their stored graph (nodes and edges), domain events and the
/// flat scalar context that flows between nodes. These types are serialized to JSON
/// for persistence and for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A single context value: string, number, bool or null
///
/// Event context and node outputs are flat maps of scalars so template resolution
/// and condition evaluation never need to walk arbitrary JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Scalar {
    /// Convert a JSON value into a scalar. Arrays and objects have no scalar form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Text used when the scalar is substituted into a template
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => format_number(*n),
            Scalar::String(s) => s.clone(),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Integral floats render without a trailing ".0" so `{{balance}}` gives "500", not "500.0"
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Flat, ordered string -> scalar map used for event context and node outputs
pub type ContextMap = BTreeMap<String, Scalar>;

/// Fixed mapping of domain event kinds to trigger strings
///
/// Trigger nodes store the string form as their subtype; the matcher and executor
/// compare against `as_str()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserExpired,
    UserChurned,
    PaymentReceived,
    Manual,
    Scheduled,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 8] = [
        TriggerKind::UserCreated,
        TriggerKind::UserUpdated,
        TriggerKind::UserDeleted,
        TriggerKind::UserExpired,
        TriggerKind::UserChurned,
        TriggerKind::PaymentReceived,
        TriggerKind::Manual,
        TriggerKind::Scheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::UserCreated => "user-created",
            TriggerKind::UserUpdated => "user-updated",
            TriggerKind::UserDeleted => "user-deleted",
            TriggerKind::UserExpired => "user-expired",
            TriggerKind::UserChurned => "user-churned",
            TriggerKind::PaymentReceived => "payment-received",
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
        }
    }

    /// Parse a trigger string. Unknown strings yield `None` and are skipped by callers.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed notification describing something that happened to an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub trigger_type: TriggerKind,
    pub tenant_id: String,
    /// Entity the event is about (e.g. a RADIUS user id)
    pub entity_reference: String,
    #[serde(default)]
    pub context: ContextMap,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        trigger_type: TriggerKind,
        tenant_id: impl Into<String>,
        entity_reference: impl Into<String>,
    ) -> Self {
        Self {
            trigger_type,
            tenant_id: tenant_id.into(),
            entity_reference: entity_reference.into(),
            context: ContextMap::new(),
            correlation_id: None,
            occurred_at: Utc::now(),
        }
    }

    /// Builder-style helper for attaching context values
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    Active,
    Inactive,
}

impl AutomationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationStatus::Active => "active",
            AutomationStatus::Inactive => "inactive",
        }
    }
}

/// A tenant-owned workflow definition plus activation state
///
/// Read-only to the engine. Registry entries are `Arc` snapshots, so an edit that
/// swaps the registry never changes a run already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Primary trigger string as set by the editor; matching uses the graph's trigger nodes
    pub trigger_type: String,
    pub status: AutomationStatus,
    pub graph: GraphDefinition,
    #[serde(default = "default_version")]
    pub version: i64,
}

fn default_version() -> i64 {
    1
}

impl Automation {
    pub fn is_active(&self) -> bool {
        self.status == AutomationStatus::Active
    }

    /// Trigger subtypes present in the stored graph, in declaration order
    pub fn trigger_subtypes(&self) -> impl Iterator<Item = &str> {
        self.graph
            .nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Trigger)
            .map(|node| node.subtype.as_str())
    }
}

/// Stored graph as produced by the editor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Condition,
    Action,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Condition => "condition",
            NodeKind::Action => "action",
        }
    }
}

/// A single stored node
///
/// `config` is a loosely-typed JSON object; it is parsed once into a typed config by
/// `automation::graph` before traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub kind: NodeKind,
    /// Trigger string for triggers (e.g. "user-expired"), "expression" for conditions,
    /// "http-request" for actions
    pub subtype: String,
    #[serde(default)]
    pub config: Value,
}

/// Directed connection between two nodes, labelled "true"/"false" out of conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl EdgeDefinition {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }

    pub fn labelled(
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: Some(label.into()),
        }
    }
}
