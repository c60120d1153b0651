pub mod dag;
pub mod definition;
pub mod executable;
pub mod model;
pub mod orchestrator;

pub use dag::{DependencyGraph, GraphError};
pub use definition::{OperatorDefinition, WorkflowDefinition};
pub use executable::{Executable, ExecutableRef, ExecutableRegistry, Expr, ExprError};
pub use model::{Operator, Workflow};
pub use orchestrator::Orchestrator;
