use crate::codec::Codec;
use crate::storage::{
    EntityStore, FilesystemEntityStore, MemoryEntityStore, ObjectEntityStore, RedbEntityStore,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration, read from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: usize,

    #[serde(default)]
    pub codec: Codec,

    /// Upper bound on a single operator invocation
    #[serde(default)]
    pub operator_timeout_secs: Option<u64>,

    /// Drop cached copies of a workflow and its operators when it is re-registered
    #[serde(default)]
    pub evict_on_register: bool,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Filesystem {
        #[serde(default = "default_store_dir")]
        dir: String,
    },
    Redb {
        #[serde(default = "default_store_file")]
        file: String,
    },
    /// `object_store` local filesystem backend rooted at `dir`
    Object {
        #[serde(default = "default_object_dir")]
        dir: String,
        #[serde(default = "default_object_prefix")]
        prefix: String,
    },
    Memory,
}

fn default_cache_capacity() -> usize {
    16 * 1024
}

fn default_store_dir() -> String {
    "store".to_string()
}

fn default_store_file() -> String {
    "store.redb".to_string()
}

fn default_object_dir() -> String {
    "objects".to_string()
}

fn default_object_prefix() -> String {
    "dagflow".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            dir: default_store_dir(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_capacity_bytes: default_cache_capacity(),
            codec: Codec::default(),
            operator_timeout_secs: None,
            evict_on_register: false,
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            Self::from_toml_str(&content)?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration file")
    }

    pub fn operator_timeout(&self) -> Option<Duration> {
        self.operator_timeout_secs.map(Duration::from_secs)
    }

    /// Location of the configured store, if it lives on disk
    pub fn store_path(&self) -> Option<PathBuf> {
        match &self.storage {
            StorageConfig::Filesystem { dir } => Some(self.data_dir.join(dir)),
            StorageConfig::Redb { file } => Some(self.data_dir.join(file)),
            StorageConfig::Object { dir, .. } => Some(self.data_dir.join(dir)),
            StorageConfig::Memory => None,
        }
    }

    /// Open the configured durable store
    pub fn open_store(&self) -> Result<Arc<dyn EntityStore>> {
        let store: Arc<dyn EntityStore> = match &self.storage {
            StorageConfig::Filesystem { dir } => Arc::new(
                FilesystemEntityStore::new(self.data_dir.join(dir))
                    .context("Failed to create filesystem store")?,
            ),
            StorageConfig::Redb { file } => Arc::new(
                RedbEntityStore::new(self.data_dir.join(file))
                    .context("Failed to create redb store")?,
            ),
            StorageConfig::Object { dir, prefix } => {
                let root = self.data_dir.join(dir);
                std::fs::create_dir_all(&root).context("Failed to create object store directory")?;
                let local = object_store::local::LocalFileSystem::new_with_prefix(&root)
                    .context("Failed to open local object store")?;
                Arc::new(ObjectEntityStore::new(Box::new(local), prefix.clone()))
            }
            StorageConfig::Memory => Arc::new(MemoryEntityStore::new()),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig::load(
            &temp_dir.path().join("missing.toml"),
            temp_dir.path().join("data"),
        )
        .unwrap();

        assert_eq!(config.cache_capacity_bytes, 16384);
        assert_eq!(config.codec, Codec::Json);
        assert!(config.operator_timeout().is_none());
        assert!(!config.evict_on_register);
        assert_eq!(
            config.store_path().unwrap(),
            temp_dir.path().join("data").join("store")
        );
        assert!(temp_dir.path().join("data").is_dir());
    }

    #[test]
    fn test_parse_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            cache_capacity_bytes = 4096
            codec = "gzip_json"
            operator_timeout_secs = 30
            evict_on_register = true

            [storage]
            backend = "redb"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_capacity_bytes, 4096);
        assert_eq!(config.codec, Codec::GzipJson);
        assert_eq!(config.operator_timeout(), Some(Duration::from_secs(30)));
        assert!(config.evict_on_register);
        assert_eq!(
            config.storage,
            StorageConfig::Redb {
                file: "store.redb".to_string()
            }
        );
    }

    #[test]
    fn test_object_backend_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = EngineConfig::from_toml_str("[storage]\nbackend = \"object\"\n").unwrap();
        config.data_dir = temp_dir.path().to_path_buf();

        assert_eq!(
            config.storage,
            StorageConfig::Object {
                dir: "objects".to_string(),
                prefix: "dagflow".to_string(),
            }
        );
        assert_eq!(config.store_path().unwrap(), temp_dir.path().join("objects"));
        assert!(config.open_store().is_ok());
        assert!(temp_dir.path().join("objects").is_dir());
    }

    #[test]
    fn test_memory_backend() {
        let config = EngineConfig::from_toml_str("[storage]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(config.storage, StorageConfig::Memory);
        assert!(config.store_path().is_none());
        assert!(config.open_store().is_ok());
    }
}
