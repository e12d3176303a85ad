/// Graph validation errors

use thiserror::Error;

use crate::runtime::condition::ConditionError;

/// Malformed stored graph. A run that hits one fails before executing any step.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("graph has no trigger nodes")]
    NoTriggerNodes,

    #[error("no trigger node matches trigger type '{0}'")]
    NoMatchingTrigger(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown node: source={source_id}, target={target_id}")]
    DanglingEdge { source_id: String, target_id: String },

    #[error("condition node '{node_id}' is missing its '{branch}' branch")]
    MissingBranch { node_id: String, branch: &'static str },

    #[error("condition node '{node_id}' has an invalid outgoing edge (label: {label:?})")]
    InvalidBranchEdge { node_id: String, label: Option<String> },

    #[error("node '{node_id}' is not a condition but has a labelled edge '{label}'")]
    UnexpectedBranchLabel { node_id: String, label: String },

    #[error("condition node '{node_id}' has an invalid expression: {source}")]
    InvalidCondition {
        node_id: String,
        #[source]
        source: ConditionError,
    },

    #[error("action node '{node_id}' has an invalid config: {message}")]
    InvalidActionConfig { node_id: String, message: String },
}
