use super::{EntityStore, Namespace};
use anyhow::{Context, Result};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const WORKFLOWS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("workflows");
const OPERATORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("operators");

fn table(namespace: Namespace) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match namespace {
        Namespace::Workflow => WORKFLOWS_TABLE,
        Namespace::Operator => OPERATORS_TABLE,
    }
}

/// Entity store backed by a single redb database file
#[derive(Clone)]
pub struct RedbEntityStore {
    db: Arc<Database>,
}

impl RedbEntityStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait::async_trait]
impl EntityStore for RedbEntityStore {
    async fn init(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let _workflows_table = write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open workflows table")?;
            let _operators_table = write_txn
                .open_table(OPERATORS_TABLE)
                .context("Failed to open operators table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;
        Ok(())
    }

    async fn put(&self, namespace: Namespace, id: &str, data: Bytes) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(table(namespace))
                .context("Failed to open table")?;
            table
                .insert(id, data.as_ref())
                .with_context(|| format!("Failed to insert {}", namespace))?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Bytes>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(table(namespace))
            .context("Failed to open table")?;

        let value = table
            .get(id)
            .with_context(|| format!("Failed to get {}", namespace))?;
        Ok(value.map(|guard| Bytes::copy_from_slice(guard.value())))
    }

    async fn exists(&self, namespace: Namespace, id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(table(namespace))
            .context("Failed to open table")?;

        let value = table
            .get(id)
            .with_context(|| format!("Failed to check {}", namespace))?;
        Ok(value.is_some())
    }
}
