//! The coordinator: a strongly consistent keyed store that arbitrates which
//! writer owns a commit file name.
//!
//! [`CoordinatorBackend`] is the wire-level contract (a DynamoDB-shaped table
//! of attribute maps with conditional puts); [`CoordinatorClient`] speaks it in
//! terms of [`CommitEntry`] values for one coordinator table.
//!
//! Every read issued through the client is strongly consistent. Conflicts are
//! outcomes, not errors: a rejected conditional put is [`PutOutcome::Conflict`]
//! and only genuine backend failures travel in the `Err` arm.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tollgate_core::error::{Error, Result};

use crate::bootstrap::{BootstrapOutcome, TableBootstrapper};
use crate::config::ExternalStoreConfig;
use crate::entry::{ATTR_COMPLETE, ATTR_FILE_NAME, ATTR_TABLE_PATH, CommitEntry};

/// A single attribute value.
///
/// Serializes as `{"S": "..."}` / `{"N": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number, kept in its decimal string form.
    N(String),
}

/// An item: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Partition (hash) key value.
    pub partition: String,
    /// Sort (range) key value.
    pub sort: String,
}

impl ItemKey {
    /// Creates a key.
    #[must_use]
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// Condition evaluated atomically against the stored item before a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional.
    None,
    /// No item with the same key may exist.
    KeyAbsent,
    /// The stored item, if any, must not have `name` equal to `value`.
    AttributeNotEqual {
        /// Attribute name.
        name: String,
        /// Forbidden value.
        value: AttributeValue,
    },
}

impl PutCondition {
    /// Evaluates the condition against the currently stored item.
    #[must_use]
    pub fn allows(&self, existing: Option<&Item>) -> bool {
        match self {
            Self::None => true,
            Self::KeyAbsent => existing.is_none(),
            Self::AttributeNotEqual { name, value } => {
                existing.is_none_or(|item| item.get(name) != Some(value))
            }
        }
    }
}

/// Result of a conditional put that reached the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The item was stored.
    Written,
    /// The condition did not hold; nothing was stored.
    Conflict,
}

/// Lifecycle status of a coordinator table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    /// Ready for reads and writes.
    Active,
    /// Being created.
    Creating,
    /// Any other status (updating, deleting, archived, ...).
    Other(String),
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Creating => f.write_str("CREATING"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Key attribute names of a coordinator table. Both keys are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    /// Hash key attribute.
    pub partition_key: String,
    /// Range key attribute.
    pub sort_key: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self {
            partition_key: ATTR_TABLE_PATH.to_string(),
            sort_key: ATTR_FILE_NAME.to_string(),
        }
    }
}

impl KeySchema {
    /// Extracts the primary key from an item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a key attribute is missing or is not
    /// a string.
    pub fn key_of(&self, item: &Item) -> Result<ItemKey> {
        let attr = |name: &str| match item.get(name) {
            Some(AttributeValue::S(value)) => Ok(value.clone()),
            _ => Err(Error::InvalidInput(format!(
                "item is missing string key attribute `{name}`"
            ))),
        };
        Ok(ItemKey::new(attr(&self.partition_key)?, attr(&self.sort_key)?))
    }
}

/// Provisioned read/write capacity for table creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedThroughput {
    /// Read capacity units.
    pub read_capacity_units: u64,
    /// Write capacity units.
    pub write_capacity_units: u64,
}

impl Default for ProvisionedThroughput {
    fn default() -> Self {
        Self {
            read_capacity_units: 5,
            write_capacity_units: 5,
        }
    }
}

/// Everything needed to create a coordinator table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Key attributes.
    pub key_schema: KeySchema,
    /// Capacity.
    pub throughput: ProvisionedThroughput,
}

/// Result of a create-table request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTableOutcome {
    /// This call created the table.
    Created,
    /// The table already existed (possibly created concurrently).
    AlreadyExists,
}

/// Wire-level coordinator contract.
///
/// Implementations must evaluate put conditions atomically with the write and
/// serve `get_item` / `query_latest` with strong consistency.
#[async_trait]
pub trait CoordinatorBackend: Send + Sync + 'static {
    /// Returns the status of `table`, or `None` if it does not exist.
    async fn describe_table(&self, table: &str) -> Result<Option<TableStatus>>;

    /// Requests creation of `table`.
    async fn create_table(&self, table: &str, spec: &TableSpec) -> Result<CreateTableOutcome>;

    /// Stores `item` if `condition` holds for the item currently under its key.
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: PutCondition,
    ) -> Result<PutOutcome>;

    /// Returns the item under `key`.
    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>>;

    /// Returns the item with the greatest sort key in `partition`.
    async fn query_latest(&self, table: &str, partition: &str) -> Result<Option<Item>>;
}

/// Commit-entry operations against one coordinator table.
#[derive(Clone)]
pub struct CoordinatorClient {
    backend: Arc<dyn CoordinatorBackend>,
    table_name: String,
}

impl fmt::Debug for CoordinatorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorClient")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl CoordinatorClient {
    /// Creates a client for an existing, active table.
    #[must_use]
    pub fn new(backend: Arc<dyn CoordinatorBackend>, table_name: impl Into<String>) -> Self {
        Self {
            backend,
            table_name: table_name.into(),
        }
    }

    /// Creates a client after making sure the configured table exists and is
    /// active, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the bootstrapper's error if the table never becomes active.
    pub async fn connect(
        backend: Arc<dyn CoordinatorBackend>,
        config: &ExternalStoreConfig,
    ) -> Result<Self> {
        let outcome = TableBootstrapper::new(
            Arc::clone(&backend),
            config.table_name.clone(),
            config.throughput,
        )
        .run()
        .await?;
        if outcome == BootstrapOutcome::Created {
            tracing::info!(table = %config.table_name, "created coordinator table");
        }
        Ok(Self::new(backend, config.table_name.clone()))
    }

    /// Name of the coordinator table.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Writes `entry`.
    ///
    /// Without `overwrite` the put only succeeds if no entry exists for the
    /// same `(table_path, file_name)`. With `overwrite` the put only succeeds
    /// if the stored entry is not complete yet: a complete entry is never
    /// rewritten, neither back to incomplete nor with a later commit time.
    ///
    /// # Errors
    ///
    /// Returns a storage error for coordinator failures. A failed condition is
    /// [`PutOutcome::Conflict`], not an error.
    pub async fn put_conditional(&self, entry: &CommitEntry, overwrite: bool) -> Result<PutOutcome> {
        let condition = if overwrite {
            PutCondition::AttributeNotEqual {
                name: ATTR_COMPLETE.to_string(),
                value: AttributeValue::S("true".to_string()),
            }
        } else {
            PutCondition::KeyAbsent
        };

        let outcome = self
            .backend
            .put_item(&self.table_name, entry.to_item(), condition)
            .await?;

        tracing::debug!(
            table_path = %entry.table_path(),
            file_name = %entry.file_name(),
            complete = entry.complete(),
            overwrite,
            ?outcome,
            "coordinator put"
        );
        Ok(outcome)
    }

    /// Returns the entry for `(table_path, file_name)`.
    ///
    /// # Errors
    ///
    /// Returns a storage error for coordinator failures and a serialization
    /// error for malformed items.
    pub async fn get_entry(&self, table_path: &str, file_name: &str) -> Result<Option<CommitEntry>> {
        let key = ItemKey::new(table_path, file_name);
        self.backend
            .get_item(&self.table_name, &key)
            .await?
            .map(|item| CommitEntry::from_item(&item))
            .transpose()
    }

    /// Returns the entry with the greatest file name for `table_path`.
    ///
    /// "Latest" is lexicographic on the file name, which matches commit order
    /// only because commit file names are zero-padded to a fixed width.
    ///
    /// # Errors
    ///
    /// Returns a storage error for coordinator failures and a serialization
    /// error for malformed items.
    pub async fn get_latest_entry(&self, table_path: &str) -> Result<Option<CommitEntry>> {
        self.backend
            .query_latest(&self.table_name, table_path)
            .await?
            .map(|item| CommitEntry::from_item(&item))
            .transpose()
    }
}
