//! Coordinator persisted in an object store.
//!
//! Only usable on backends whose conditional puts and listings are strongly
//! consistent: GCS, Azure, S3 with `ETag` conditional writes, the in-memory
//! backend. Layout under `prefix`:
//!
//! ```text
//! {prefix}/{table}/_table.json                       table spec
//! {prefix}/{table}/items/{sha256(partition)}/{hex(sort)}.json
//! ```
//!
//! Sort keys are hex-encoded byte by byte, which keeps object names in the
//! same order as the keys they encode.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest as _, Sha256};

use tollgate_core::error::{Error, Result};
use tollgate_core::storage::{StorageBackend, WritePrecondition, WriteResult};

use crate::coordinator::{
    CoordinatorBackend, CreateTableOutcome, Item, ItemKey, KeySchema, PutCondition, PutOutcome,
    TableSpec, TableStatus,
};

/// Default number of compare-and-swap attempts for conditional updates.
pub const DEFAULT_MAX_CAS_RETRIES: usize = 16;

/// Coordinator backend storing one JSON object per item.
#[derive(Clone)]
pub struct StorageCoordinator {
    storage: Arc<dyn StorageBackend>,
    prefix: String,
    schemas: Arc<RwLock<HashMap<String, KeySchema>>>,
    max_cas_retries: usize,
}

impl std::fmt::Debug for StorageCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCoordinator")
            .field("prefix", &self.prefix)
            .field("max_cas_retries", &self.max_cas_retries)
            .finish_non_exhaustive()
    }
}

impl StorageCoordinator {
    /// Creates a coordinator keeping its tables under `prefix`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into().trim_matches('/').to_string(),
            schemas: Arc::new(RwLock::new(HashMap::new())),
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }

    /// Sets the number of compare-and-swap attempts.
    #[must_use]
    pub fn with_max_cas_retries(mut self, retries: usize) -> Self {
        self.max_cas_retries = retries;
        self
    }

    fn table_dir(&self, table: &str) -> String {
        if self.prefix.is_empty() {
            table.to_string()
        } else {
            format!("{}/{table}", self.prefix)
        }
    }

    fn marker_path(&self, table: &str) -> String {
        format!("{}/_table.json", self.table_dir(table))
    }

    fn partition_dir(&self, table: &str, partition: &str) -> String {
        format!("{}/items/{}", self.table_dir(table), sha256_hex(partition.as_bytes()))
    }

    fn item_path(&self, table: &str, key: &ItemKey) -> String {
        format!(
            "{}/{}.json",
            self.partition_dir(table, &key.partition),
            hex::encode(key.sort.as_bytes())
        )
    }

    async fn key_schema(&self, table: &str) -> Result<KeySchema> {
        if let Some(schema) = self
            .schemas
            .read()
            .map_err(|_| poisoned())?
            .get(table)
            .cloned()
        {
            return Ok(schema);
        }

        let bytes = match self.storage.get(&self.marker_path(table)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Err(Error::storage(format!("coordinator table {table} not found")));
            }
            Err(e) => return Err(e),
        };
        let spec: TableSpec = serde_json::from_slice(&bytes).map_err(|e| {
            Error::serialization(format!("failed to deserialize table spec for {table}: {e}"))
        })?;
        self.schemas
            .write()
            .map_err(|_| poisoned())?
            .insert(table.to_string(), spec.key_schema.clone());
        Ok(spec.key_schema)
    }

    async fn load_item(&self, path: &str) -> Result<Option<(Item, String)>> {
        let Some(meta) = self.storage.head(path).await? else {
            return Ok(None);
        };
        let bytes = match self.storage.get(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some((decode_item(&bytes)?, meta.version)))
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn encode_item(item: &Item) -> Result<Bytes> {
    serde_json::to_vec(item)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(format!("failed to serialize item: {e}")))
}

fn decode_item(bytes: &[u8]) -> Result<Item> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::serialization(format!("failed to deserialize item: {e}")))
}

#[async_trait]
impl CoordinatorBackend for StorageCoordinator {
    async fn describe_table(&self, table: &str) -> Result<Option<TableStatus>> {
        Ok(self
            .storage
            .head(&self.marker_path(table))
            .await?
            .map(|_| TableStatus::Active))
    }

    async fn create_table(&self, table: &str, spec: &TableSpec) -> Result<CreateTableOutcome> {
        let json = serde_json::to_vec(spec)
            .map_err(|e| Error::serialization(format!("failed to serialize table spec: {e}")))?;
        match self
            .storage
            .put(&self.marker_path(table), Bytes::from(json), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(CreateTableOutcome::Created),
            WriteResult::PreconditionFailed { .. } => Ok(CreateTableOutcome::AlreadyExists),
        }
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: PutCondition,
    ) -> Result<PutOutcome> {
        let key = self.key_schema(table).await?.key_of(&item)?;
        let path = self.item_path(table, &key);
        let data = encode_item(&item)?;

        match condition {
            PutCondition::None => {
                self.storage.put(&path, data, WritePrecondition::None).await?;
                Ok(PutOutcome::Written)
            }
            PutCondition::KeyAbsent => {
                match self
                    .storage
                    .put(&path, data, WritePrecondition::DoesNotExist)
                    .await?
                {
                    WriteResult::Success { .. } => Ok(PutOutcome::Written),
                    WriteResult::PreconditionFailed { .. } => Ok(PutOutcome::Conflict),
                }
            }
            condition @ PutCondition::AttributeNotEqual { .. } => {
                for _ in 0..self.max_cas_retries {
                    let (existing, precondition) = match self.load_item(&path).await? {
                        Some((existing, version)) => {
                            (Some(existing), WritePrecondition::MatchesVersion(version))
                        }
                        None => (None, WritePrecondition::DoesNotExist),
                    };
                    if !condition.allows(existing.as_ref()) {
                        return Ok(PutOutcome::Conflict);
                    }
                    match self.storage.put(&path, data.clone(), precondition).await? {
                        WriteResult::Success { .. } => return Ok(PutOutcome::Written),
                        WriteResult::PreconditionFailed { .. } => {}
                    }
                }
                Err(Error::storage(format!(
                    "conditional put on {table} did not settle after {} attempts",
                    self.max_cas_retries
                )))
            }
        }
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        self.key_schema(table).await?;
        Ok(self
            .load_item(&self.item_path(table, key))
            .await?
            .map(|(item, _)| item))
    }

    async fn query_latest(&self, table: &str, partition: &str) -> Result<Option<Item>> {
        self.key_schema(table).await?;
        let prefix = format!("{}/", self.partition_dir(table, partition));
        let latest = self
            .storage
            .list(&prefix)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .filter(|path| path.ends_with(".json"))
            .max();
        match latest {
            Some(path) => Ok(self.load_item(&path).await?.map(|(item, _)| item)),
            None => Ok(None),
        }
    }
}
