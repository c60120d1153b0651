use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, comparable value produced by an operator
pub type Payload = serde_json::Value;

/// Unique identifier for a single workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registered workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkflowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier for a registered operator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(pub String);

impl OperatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OperatorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OperatorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Output of one operator invocation, scoped to a single execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorResult {
    pub operator_id: OperatorId,
    pub payload: Payload,
}

impl OperatorResult {
    pub fn new(operator_id: impl Into<OperatorId>, payload: Payload) -> Self {
        Self {
            operator_id: operator_id.into(),
            payload,
        }
    }

    pub fn operator_id(&self) -> &OperatorId {
        &self.operator_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// Ordered `(upstream, downstream)` pair: `upstream` must run before `downstream`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub upstream: OperatorId,
    pub downstream: OperatorId,
}

impl Dependency {
    pub fn new(upstream: impl Into<OperatorId>, downstream: impl Into<OperatorId>) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }
}

impl<A, B> From<(A, B)> for Dependency
where
    A: Into<OperatorId>,
    B: Into<OperatorId>,
{
    fn from((upstream, downstream): (A, B)) -> Self {
        Self::new(upstream, downstream)
    }
}
