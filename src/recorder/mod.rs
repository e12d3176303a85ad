/// Execution Recorder
///
/// Durable trail of runs and steps. The executor writes the run header when a run
/// opens, appends each step as it is produced (a crash mid-run still leaves an
/// inspectable partial record) and writes the header once more when the run
/// finishes. The deduplication guard and the history API read through the same trait.

// Run and step record types
pub mod types;

// Recorder error taxonomy
pub mod error;

// SQLite-backed recorder using sqlx
pub mod sqlite;

pub use error::RecorderError;
pub use sqlite::SqliteRecorder;
pub use types::{
    EntityKey, ExecutionRun, ExecutionStep, HttpDetails, RunMetrics, RunStatus, StepStatus,
};

use crate::automation::types::TriggerKind;
use async_trait::async_trait;
use std::collections::HashSet;

/// Persistence seam for execution records
#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
    /// Persist a new `running` run header
    ///
    /// Guarded runs are subject to the at-most-once constraint and fail with
    /// `RecorderError::AlreadyFired` when another guarded run already holds the slot.
    async fn open_run(&self, run: &ExecutionRun) -> Result<(), RecorderError>;

    /// Append one step; step_order must be strictly increasing within the run
    async fn append_step(&self, step: &ExecutionStep) -> Result<(), RecorderError>;

    /// Write the terminal status, metrics and completion time of an open run
    async fn finish_run(&self, run: &ExecutionRun) -> Result<(), RecorderError>;

    /// Run header with its steps
    async fn get_run(&self, run_id: &str) -> Result<Option<ExecutionRun>, RecorderError>;

    async fn list_steps(&self, run_id: &str) -> Result<Vec<ExecutionStep>, RecorderError>;

    /// Run headers for an automation, newest first
    async fn list_runs(
        &self,
        automation_id: &str,
        limit: u32,
    ) -> Result<Vec<ExecutionRun>, RecorderError>;

    /// Subset of `candidates` with a guarded completed or completed_with_errors run
    /// for `trigger`. Unguarded runs (live events, manual tests) never count.
    async fn fired_entities(
        &self,
        trigger: TriggerKind,
        candidates: &[EntityKey],
    ) -> Result<HashSet<EntityKey>, RecorderError>;
}
