/// Automation Management Layer
///
/// Read-only view of tenant automations for the engine:
/// - Type definitions (Automation, Node, Edge, DomainEvent, Scalar context)
/// - Typed graph compilation and validation on top of petgraph
/// - SQLite persistence with sqlx
/// - Lock-free snapshot registry using ArcSwap

// Core type definitions
pub mod types;

// Graph validation errors
pub mod error;

// Stored graph -> typed adjacency structure
pub mod graph;

// SQLite persistence layer for automation snapshots
pub mod storage;

// Snapshot registry with trigger index
pub mod registry;

// Re-export commonly used types
pub use error::GraphError;
pub use graph::CompiledGraph;
pub use registry::AutomationRegistry;
pub use storage::AutomationStorage;
pub use types::{
    Automation, AutomationStatus, ContextMap, DomainEvent, EdgeDefinition, GraphDefinition,
    NodeDefinition, NodeKind, Scalar, TriggerKind,
};
