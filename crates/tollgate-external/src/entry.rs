//! The coordinator entry: one record per commit file claimed through the
//! coordinator.
//!
//! An entry is created incomplete when a writer claims a file name and is
//! overwritten once, with a commit time, after the payload is visible at its
//! final path. Entries are never deleted here.

use tollgate_core::error::{Error, Result};
use tollgate_core::paths::{DELTA_LOG_DIR, TEMP_DIR};

use crate::coordinator::{AttributeValue, Item, ItemKey};

/// Partition key attribute: the resolved table root.
pub const ATTR_TABLE_PATH: &str = "tablePath";
/// Sort key attribute: the commit file name.
pub const ATTR_FILE_NAME: &str = "fileName";
/// Staging object, relative to the log directory.
pub const ATTR_TEMP_PATH: &str = "tempPath";
/// `"true"` or `"false"`.
pub const ATTR_COMPLETE: &str = "complete";
/// Commit time in epoch seconds, present only on complete entries.
pub const ATTR_COMMIT_TIME: &str = "commitTime";

/// Coordinator record for one commit file.
///
/// Completion is derived from the commit time, so an entry can never be
/// complete without one or carry one while incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    table_path: String,
    file_name: String,
    temp_path: String,
    commit_time: Option<i64>,
}

impl CommitEntry {
    /// Creates an incomplete entry (the claim).
    #[must_use]
    pub fn new(
        table_path: impl Into<String>,
        file_name: impl Into<String>,
        temp_path: impl Into<String>,
    ) -> Self {
        Self {
            table_path: table_path.into(),
            file_name: file_name.into(),
            temp_path: temp_path.into(),
            commit_time: None,
        }
    }

    /// Returns a complete copy of this entry committed at `commit_time`.
    #[must_use]
    pub fn as_complete(&self, commit_time: i64) -> Self {
        Self {
            commit_time: Some(commit_time),
            ..self.clone()
        }
    }

    /// Resolved table root URI.
    #[must_use]
    pub fn table_path(&self) -> &str {
        &self.table_path
    }

    /// Commit file name, e.g. `00000000000000000001.json`.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Staging object relative to the log directory, e.g.
    /// `.tmp/00000000000000000001.json.<uuid>.tmp`.
    #[must_use]
    pub fn temp_path(&self) -> &str {
        &self.temp_path
    }

    /// Whether the payload is visible at its final path.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.commit_time.is_some()
    }

    /// Commit time in epoch seconds.
    #[must_use]
    pub fn commit_time(&self) -> Option<i64> {
        self.commit_time
    }

    /// `{table_path}/_delta_log/{file_name}`.
    #[must_use]
    pub fn absolute_file_path(&self) -> String {
        format!("{}/{DELTA_LOG_DIR}/{}", self.table_path, self.file_name)
    }

    /// `{table_path}/_delta_log/{temp_path}`.
    #[must_use]
    pub fn absolute_temp_path(&self) -> String {
        format!("{}/{DELTA_LOG_DIR}/{}", self.table_path, self.temp_path)
    }

    /// Coordinator key of this entry.
    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.table_path.clone(), self.file_name.clone())
    }

    /// Encodes the entry as a coordinator item.
    #[must_use]
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(ATTR_TABLE_PATH.into(), AttributeValue::S(self.table_path.clone()));
        item.insert(ATTR_FILE_NAME.into(), AttributeValue::S(self.file_name.clone()));
        item.insert(ATTR_TEMP_PATH.into(), AttributeValue::S(self.temp_path.clone()));
        item.insert(
            ATTR_COMPLETE.into(),
            AttributeValue::S(self.complete().to_string()),
        );
        if let Some(commit_time) = self.commit_time {
            item.insert(ATTR_COMMIT_TIME.into(), AttributeValue::N(commit_time.to_string()));
        }
        item
    }

    /// Decodes a coordinator item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if an attribute is missing or has the
    /// wrong type, or if `complete` disagrees with the presence of
    /// `commitTime`.
    pub fn from_item(item: &Item) -> Result<Self> {
        let complete = match string_attr(item, ATTR_COMPLETE)? {
            "true" => true,
            "false" => false,
            other => {
                return Err(Error::serialization(format!(
                    "attribute `{ATTR_COMPLETE}` must be \"true\" or \"false\", got {other:?}"
                )));
            }
        };

        let commit_time = match item.get(ATTR_COMMIT_TIME) {
            None => None,
            Some(AttributeValue::N(raw)) => Some(raw.parse::<i64>().map_err(|e| {
                Error::serialization(format!("attribute `{ATTR_COMMIT_TIME}` is not an integer: {e}"))
            })?),
            Some(AttributeValue::S(_)) => {
                return Err(Error::serialization(format!(
                    "attribute `{ATTR_COMMIT_TIME}` must be a number"
                )));
            }
        };

        if complete != commit_time.is_some() {
            return Err(Error::serialization(format!(
                "entry is complete={complete} but commitTime is {}",
                if commit_time.is_some() { "set" } else { "missing" }
            )));
        }

        Ok(Self {
            table_path: string_attr(item, ATTR_TABLE_PATH)?.to_string(),
            file_name: string_attr(item, ATTR_FILE_NAME)?.to_string(),
            temp_path: string_attr(item, ATTR_TEMP_PATH)?.to_string(),
            commit_time,
        })
    }
}

/// Builds the relative staging path for `file_name` with a unique `token`.
#[must_use]
pub fn temp_path_for(file_name: &str, token: &str) -> String {
    format!("{TEMP_DIR}/{file_name}.{token}.tmp")
}

fn string_attr<'a>(item: &'a Item, name: &str) -> Result<&'a str> {
    match item.get(name) {
        Some(AttributeValue::S(value)) => Ok(value),
        Some(AttributeValue::N(_)) => Err(Error::serialization(format!(
            "attribute `{name}` must be a string"
        ))),
        None => Err(Error::serialization(format!("missing attribute `{name}`"))),
    }
}
