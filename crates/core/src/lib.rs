// Core engine for Dagflow: dependency graphs, the recency cache and the orchestrator

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod storage;
pub mod types;
pub mod workflow;

pub use cache::{CacheStats, RecencyCache};
pub use codec::Codec;
pub use config::{EngineConfig, StorageConfig};
pub use error::{BoxError, EngineError, EngineResult, ValidationError};
pub use storage::{EntityStore, Namespace};
pub use types::*;
pub use workflow::{
    DependencyGraph, Executable, ExecutableRef, ExecutableRegistry, Expr, Orchestrator,
    WorkflowDefinition,
};
