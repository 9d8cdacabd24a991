//! In-process coordinator.
//!
//! Models a DynamoDB table closely enough to exercise the protocol: atomic
//! conditional puts, strongly consistent reads, a `CREATING` phase after table
//! creation and operations rejected until the table is `ACTIVE`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tollgate_core::error::{Error, Result};

use crate::coordinator::{
    CoordinatorBackend, CreateTableOutcome, Item, ItemKey, PutCondition, PutOutcome, TableSpec,
    TableStatus,
};

/// In-memory coordinator backend.
///
/// Clones share state, so one instance can stand in for a remote table seen
/// by several writers.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    tables: Arc<Mutex<HashMap<String, MemoryTable>>>,
    creating_describes: u32,
}

#[derive(Debug)]
struct MemoryTable {
    spec: TableSpec,
    status: TableStatus,
    describes_until_active: u32,
    items: BTreeMap<ItemKey, Item>,
}

impl MemoryTable {
    fn require_active(&self, table: &str) -> Result<()> {
        if self.status == TableStatus::Active {
            Ok(())
        } else {
            Err(Error::storage(format!(
                "coordinator table {table} is {}",
                self.status
            )))
        }
    }
}

impl MemoryCoordinator {
    /// Creates a coordinator with no tables. Created tables are immediately
    /// active.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps newly created tables in `CREATING` for `describes` describe calls;
    /// the next describe reports `ACTIVE`.
    #[must_use]
    pub fn with_creating_describes(mut self, describes: u32) -> Self {
        self.creating_describes = describes;
        self
    }

    /// Forces the status of `table`, creating an empty table if needed.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn force_status(&self, table: &str, status: TableStatus) -> Result<()> {
        let mut tables = self.lock()?;
        let entry = tables
            .entry(table.to_string())
            .or_insert_with(|| MemoryTable {
                spec: TableSpec::default(),
                status: TableStatus::Creating,
                describes_until_active: 0,
                items: BTreeMap::new(),
            });
        entry.status = status;
        entry.describes_until_active = 0;
        Ok(())
    }

    /// Returns every item of `table` in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    pub fn items(&self, table: &str) -> Result<Vec<Item>> {
        let tables = self.lock()?;
        let table = tables
            .get(table)
            .ok_or_else(|| missing_table(table))?;
        Ok(table.items.values().cloned().collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryTable>>> {
        self.tables.lock().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }
}

fn missing_table(table: &str) -> Error {
    Error::storage(format!("coordinator table {table} not found"))
}

#[async_trait]
impl CoordinatorBackend for MemoryCoordinator {
    async fn describe_table(&self, table: &str) -> Result<Option<TableStatus>> {
        let mut tables = self.lock()?;
        let Some(entry) = tables.get_mut(table) else {
            return Ok(None);
        };
        let status = entry.status.clone();
        if status == TableStatus::Creating {
            if entry.describes_until_active == 0 {
                entry.status = TableStatus::Active;
                return Ok(Some(TableStatus::Active));
            }
            entry.describes_until_active -= 1;
        }
        Ok(Some(status))
    }

    async fn create_table(&self, table: &str, spec: &TableSpec) -> Result<CreateTableOutcome> {
        let mut tables = self.lock()?;
        if tables.contains_key(table) {
            return Ok(CreateTableOutcome::AlreadyExists);
        }
        tables.insert(
            table.to_string(),
            MemoryTable {
                spec: spec.clone(),
                status: if self.creating_describes == 0 {
                    TableStatus::Active
                } else {
                    TableStatus::Creating
                },
                describes_until_active: self.creating_describes,
                items: BTreeMap::new(),
            },
        );
        Ok(CreateTableOutcome::Created)
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: PutCondition,
    ) -> Result<PutOutcome> {
        let mut tables = self.lock()?;
        let entry = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        entry.require_active(table)?;

        let key = entry.spec.key_schema.key_of(&item)?;
        if !condition.allows(entry.items.get(&key)) {
            return Ok(PutOutcome::Conflict);
        }
        entry.items.insert(key, item);
        Ok(PutOutcome::Written)
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        let tables = self.lock()?;
        let entry = tables.get(table).ok_or_else(|| missing_table(table))?;
        entry.require_active(table)?;
        Ok(entry.items.get(key).cloned())
    }

    async fn query_latest(&self, table: &str, partition: &str) -> Result<Option<Item>> {
        let tables = self.lock()?;
        let entry = tables.get(table).ok_or_else(|| missing_table(table))?;
        entry.require_active(table)?;
        Ok(entry
            .items
            .range(ItemKey::new(partition, "")..)
            .take_while(|(key, _)| key.partition == partition)
            .last()
            .map(|(_, item)| item.clone()))
    }
}
