use super::executable::ExecutableRef;
use crate::types::{Dependency, OperatorId, WorkflowId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Declarative workflow, as written in a TOML definition file
///
/// ```toml
/// id = "sum"
/// dependencies = [["a", "c"], ["b", "c"]]
///
/// [[operators]]
/// id = "a"
/// executable = { kind = "expression", expr = { const = 1 } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    #[serde(default)]
    pub operators: Vec<OperatorDefinition>,
    #[serde(default)]
    pub dependencies: Vec<(OperatorId, OperatorId)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDefinition {
    pub id: OperatorId,
    pub executable: ExecutableRef,
}

impl WorkflowDefinition {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse workflow definition")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow definition {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn operator_entries(&self) -> impl Iterator<Item = (OperatorId, ExecutableRef)> + '_ {
        self.operators
            .iter()
            .map(|op| (op.id.clone(), op.executable.clone()))
    }

    pub fn dependency_list(&self) -> Vec<Dependency> {
        self.dependencies
            .iter()
            .cloned()
            .map(Dependency::from)
            .collect()
    }
}
