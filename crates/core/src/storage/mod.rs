pub mod fs;
pub mod memory;
pub mod object;
pub mod redb_store;

pub use self::fs::FilesystemEntityStore;
pub use self::memory::MemoryEntityStore;
pub use self::object::ObjectEntityStore;
pub use self::redb_store::RedbEntityStore;

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Keyspace an entity lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Workflow,
    Operator,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Workflow, Namespace::Operator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Operator => "operator",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable, namespaced key-value storage for encoded entities
///
/// `put` overwrites any prior value under the same key. A missing key is
/// `Ok(None)` from `get`; `Err` is reserved for real storage failures.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Prepare both namespaces. Safe to call more than once.
    async fn init(&self) -> Result<()>;

    async fn put(&self, namespace: Namespace, id: &str, data: Bytes) -> Result<()>;

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Bytes>>;

    async fn exists(&self, namespace: Namespace, id: &str) -> Result<bool>;

    /// Reject ids this backend cannot store, before anything is written
    fn validate_id(&self, _namespace: Namespace, _id: &str) -> Result<()> {
        Ok(())
    }
}
