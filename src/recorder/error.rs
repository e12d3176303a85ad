/// Recorder error taxonomy
///
/// Database and serialization failures, plus the at-most-once rejection that the
/// executor turns into `ExecuteError::AlreadyFired`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// A guarded run for the same (automation, trigger, entity) is running or has fired
    #[error("automation {automation_id} already fired {trigger_type} for entity {entity_reference}")]
    AlreadyFired {
        automation_id: String,
        trigger_type: String,
        entity_reference: String,
    },

    #[error("run {0} is not open")]
    RunNotOpen(String),

    #[error("corrupt execution record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
