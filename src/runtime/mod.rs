/// Runtime Execution Engine
///
/// Everything between a domain event and a recorded execution run:
/// - Matching events to active automations
/// - Depth-first graph traversal with per-path data flow
/// - Template resolution and condition evaluation
/// - HTTP action invocation
/// - Guarded lifecycle scans that fire at most once per entity

// Condition expressions (minijinja), checked at graph compile time
pub mod condition;

// `{{path}}` template rendering (minijinja)
pub mod template;

// Side-effect seam for action nodes (reqwest)
pub mod invoker;

// Graph traversal state machine
pub mod executor;

// Registry-backed trigger matching
pub mod matcher;

// At-most-once filter over the execution recorder
pub mod dedup;

// Concurrent fan-out of one event to every matching automation
pub mod dispatcher;

// Scan-and-fire for periodically rescanned lifecycle triggers
pub mod scanner;

pub use dedup::DeduplicationGuard;
pub use dispatcher::EventDispatcher;
pub use condition::Condition;
pub use executor::{ExecuteError, ExecutorSettings, WorkflowExecutor};
pub use invoker::{ActionInvoker, ActionOutcome, ActionRequest, HttpInvoker};
pub use matcher::TriggerMatcher;
pub use scanner::{EntitySource, LifecycleEntity, LifecycleScanner, ScanError, ScanReport};
