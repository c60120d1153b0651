use super::{EntityStore, Namespace};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Filesystem-backed entity store: one directory per namespace, one file per id
#[derive(Clone)]
pub struct FilesystemEntityStore {
    base_path: PathBuf,
}

impl FilesystemEntityStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)
            .context("Failed to create entity store directory")?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.base_path.join(namespace.as_str())
    }

    fn entity_path(&self, namespace: Namespace, id: &str) -> Result<PathBuf> {
        check_file_name(namespace, id)?;
        Ok(self.namespace_dir(namespace).join(id))
    }
}

// ids become file names and must not escape the namespace directory
fn check_file_name(namespace: Namespace, id: &str) -> Result<()> {
    if id.is_empty()
        || id.starts_with('.')
        || id.contains(|c: char| c == '/' || c == '\\' || c == '\0')
    {
        bail!("Invalid {} id for filesystem store: {:?}", namespace, id);
    }
    Ok(())
}

#[async_trait::async_trait]
impl EntityStore for FilesystemEntityStore {
    async fn init(&self) -> Result<()> {
        for namespace in Namespace::ALL {
            tokio::fs::create_dir_all(self.namespace_dir(namespace))
                .await
                .with_context(|| format!("Failed to create {} directory", namespace))?;
        }
        Ok(())
    }

    fn validate_id(&self, namespace: Namespace, id: &str) -> Result<()> {
        check_file_name(namespace, id)
    }

    async fn put(&self, namespace: Namespace, id: &str, data: Bytes) -> Result<()> {
        let path = self.entity_path(namespace, id)?;
        let tmp_path = self.namespace_dir(namespace).join(format!(".{}.tmp", id));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create namespace directory")?;
        }

        // Write beside the target and rename over it so readers never see a torn file
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .context("Failed to create entity file")?;
        file.write_all(&data)
            .await
            .context("Failed to write entity")?;
        file.sync_all().await.context("Failed to sync entity")?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path)
            .await
            .context("Failed to move entity into place")?;
        Ok(())
    }

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Bytes>> {
        let path = self.entity_path(namespace, id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {} '{}'", namespace, id)),
        }
    }

    async fn exists(&self, namespace: Namespace, id: &str) -> Result<bool> {
        let path = self.entity_path(namespace, id)?;
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check {} '{}'", namespace, id))
    }
}
