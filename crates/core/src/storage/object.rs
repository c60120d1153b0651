use super::{EntityStore, Namespace};
use anyhow::{Context, Result};
use bytes::Bytes;

/// Entity store over any `object_store` backend (S3, MinIO, local, in-memory)
pub struct ObjectEntityStore {
    store: Box<dyn object_store::ObjectStore>,
    prefix: String,
}

impl ObjectEntityStore {
    pub fn new(store: Box<dyn object_store::ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn entity_key(&self, namespace: Namespace, id: &str) -> object_store::path::Path {
        let key = format!("{}/{}/{}", self.prefix, namespace, id);
        object_store::path::Path::from(key)
    }
}

#[async_trait::async_trait]
impl EntityStore for ObjectEntityStore {
    async fn init(&self) -> Result<()> {
        // Object stores have no directories to create
        Ok(())
    }

    async fn put(&self, namespace: Namespace, id: &str, data: Bytes) -> Result<()> {
        let key = self.entity_key(namespace, id);
        self.store
            .put(&key, data.into())
            .await
            .with_context(|| format!("Failed to put {} to object store", namespace))?;
        Ok(())
    }

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Bytes>> {
        let key = self.entity_key(namespace, id);

        match self.store.get(&key).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .context("Failed to read entity bytes")?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e).context("Failed to get entity from object store"),
        }
    }

    async fn exists(&self, namespace: Namespace, id: &str) -> Result<bool> {
        let key = self.entity_key(namespace, id);
        match self.store.head(&key).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e).context("Failed to check entity existence"),
        }
    }
}
