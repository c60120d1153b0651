use super::{EntityStore, Namespace};
use anyhow::Result;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process entity store; contents vanish with the process
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: RwLock<HashMap<(Namespace, String), Bytes>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities stored in `namespace`
    pub async fn count(&self, namespace: Namespace) -> usize {
        self.entities
            .read()
            .await
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .count()
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryEntityStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn put(&self, namespace: Namespace, id: &str, data: Bytes) -> Result<()> {
        self.entities
            .write()
            .await
            .insert((namespace, id.to_string()), data);
        Ok(())
    }

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Bytes>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(namespace, id.to_string()))
            .cloned())
    }

    async fn exists(&self, namespace: Namespace, id: &str) -> Result<bool> {
        Ok(self
            .entities
            .read()
            .await
            .contains_key(&(namespace, id.to_string())))
    }
}
