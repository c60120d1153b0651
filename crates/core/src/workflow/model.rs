use super::dag::DependencyGraph;
use super::executable::ExecutableRef;
use crate::types::{OperatorId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered workflow: operator index plus the graph over its vertex ids
///
/// Position `i` of `operator_index` is the operator behind vertex `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub operator_index: Vec<OperatorId>,
    pub graph: DependencyGraph,
    /// Reserved; execution ignores it
    #[serde(default)]
    pub status: bool,
    pub registered_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: WorkflowId, operator_index: Vec<OperatorId>, graph: DependencyGraph) -> Self {
        Self {
            id,
            operator_index,
            graph,
            status: false,
            registered_at: Utc::now(),
        }
    }

    pub fn operator_count(&self) -> usize {
        self.operator_index.len()
    }

    /// Operator id behind `vertex`
    pub fn operator_at(&self, vertex: usize) -> Option<&OperatorId> {
        self.operator_index.get(vertex)
    }

    /// Vertex id assigned to `operator_id`
    pub fn vertex_of(&self, operator_id: &OperatorId) -> Option<usize> {
        self.operator_index.iter().position(|id| id == operator_id)
    }
}

/// Registered operator and a reference to its code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub executable: ExecutableRef,
}

impl Operator {
    pub fn new(id: impl Into<OperatorId>, executable: ExecutableRef) -> Self {
        Self {
            id: id.into(),
            executable,
        }
    }
}
