// Error types for dagflow.
//
// Each layer owns a small `thiserror` enum; `EngineError` is what the
// orchestrator hands back to callers of `register_workflow` and
// `execute_workflow`.

use crate::storage::Namespace;
use crate::types::{OperatorId, WorkflowId};
use crate::workflow::dag::GraphError;
use std::time::Duration;

/// Boxed error returned by operator code
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for orchestrator operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Registration input was rejected before anything was persisted
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Entity is absent from both the cache and the durable store
    #[error("{namespace} '{id}' not found")]
    NotFound { namespace: Namespace, id: String },

    /// Dependency graph problem, including cycles
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Codec failed to encode or decode an entity
    #[error("Serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// Operator code failed; the run is aborted
    #[error("Operator '{operator_id}' failed: {source}")]
    Execution {
        operator_id: OperatorId,
        #[source]
        source: BoxError,
    },

    /// Operator did not finish within the configured timeout
    #[error("Operator '{operator_id}' timed out after {timeout:?}")]
    Timeout {
        operator_id: OperatorId,
        timeout: Duration,
    },

    /// Execution was cancelled through its cancellation token
    #[error("Execution of workflow '{workflow_id}' was cancelled")]
    Cancelled { workflow_id: WorkflowId },

    /// Operator references a code name nobody registered in this process
    #[error("Operator '{operator_id}' references unknown executable '{name}'")]
    UnknownExecutable { operator_id: OperatorId, name: String },

    /// An execution invariant was violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// Durable store failure other than a missing entity
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(namespace: Namespace, id: impl Into<String>) -> Self {
        Self::NotFound {
            namespace,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Graph(GraphError::CycleDetected { .. }))
    }
}

/// Rejections raised while validating a registration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Dependency ({upstream}, {downstream}) references unknown operator '{missing}'")]
    UnknownOperator {
        upstream: OperatorId,
        downstream: OperatorId,
        missing: OperatorId,
    },

    #[error("Operator '{0}' is declared more than once")]
    DuplicateOperator(OperatorId),

    #[error("Identifiers must not be empty")]
    EmptyId,

    /// The durable store cannot hold an entity under this id
    #[error("{namespace} id {id:?} is not storable: {reason}")]
    UnstorableId {
        namespace: Namespace,
        id: String,
        reason: String,
    },
}

/// Codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Io(#[from] std::io::Error),
}
