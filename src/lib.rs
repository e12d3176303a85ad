/// radflow: automation workflow execution engine
///
/// Given a stored automation graph (triggers, conditions, HTTP actions) and a
/// domain event, matches the automations that care, traverses their graphs and
/// records a full execution trail, with at-most-once firing for periodically
/// rescanned lifecycle events.

// Core configuration and setup
pub mod config;

// SQLite pool setup shared by storage and recorder
pub mod db;

// Automation definitions, graph compilation, storage and registry
pub mod automation;

// Execution runs and steps, and their persistence
pub mod recorder;

// Matching, traversal, actions, deduplication and lifecycle scans
pub mod runtime;

// HTTP API layer - event intake, snapshot sync, test triggers and history
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use automation::{Automation, DomainEvent, TriggerKind};
pub use recorder::{ExecutionRun, ExecutionStep, RunStatus};
pub use runtime::{EventDispatcher, LifecycleScanner, WorkflowExecutor};
pub use server::start_server;
