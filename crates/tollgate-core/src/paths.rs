//! Path conventions for table logs.
//!
//! Layout of a table under a store root:
//!
//! ```text
//! {root}/{table}/_delta_log/00000000000000000000.json
//! {root}/{table}/_delta_log/00000000000000000001.json
//! {root}/{table}/_delta_log/.tmp/00000000000000000001.json.{uuid}.tmp
//! ```
//!
//! Backend keys are `/`-separated with no leading slash. Callers may pass either
//! such a key or a fully qualified URI under the store root; [`PathResolver`]
//! turns both into the canonical pair (absolute URI, backend key).

use crate::error::{Error, Result};

/// Name of the log directory inside a table root.
pub const DELTA_LOG_DIR: &str = "_delta_log";

/// Staging directory for uncommitted payloads, relative to the log directory.
pub const TEMP_DIR: &str = ".tmp";

/// Number of digits used in zero-padded commit file names.
pub const COMMIT_FILENAME_DIGITS: usize = 20;

/// Returns the commit file name for `version`, e.g. `00000000000000000007.json`.
#[must_use]
pub fn commit_file_name(version: u64) -> String {
    format!("{version:0width$}.json", width = COMMIT_FILENAME_DIGITS)
}

/// Parses a commit file name produced by [`commit_file_name`].
///
/// Returns `None` for anything else (checkpoints, temp files, other names).
#[must_use]
pub fn parse_commit_version(file_name: &str) -> Option<u64> {
    let digits = file_name.strip_suffix(".json")?;
    if digits.len() != COMMIT_FILENAME_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Normalizes a backend key: drops empty and `.` segments and resolves `..`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `..` would escape the root.
pub fn normalize_key(key: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in key.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidInput(format!(
                        "path escapes the store root: {key}"
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Joins a directory key and a relative name. An empty directory is the root.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits a normalized key into its parent directory and file name.
#[must_use]
pub fn split_parent(key: &str) -> (&str, &str) {
    key.rsplit_once('/').unwrap_or(("", key))
}

/// Maps caller paths onto a store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root: String,
}

impl PathResolver {
    /// Creates a resolver for a store root URI such as `s3://bucket` or
    /// `memory://`.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        let root = if trimmed.ends_with(':') {
            // `memory://` style roots keep their authority separator.
            format!("{trimmed}//")
        } else {
            trimmed.to_string()
        };
        Self { root }
    }

    /// Returns the store root URI.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Converts a key or a qualified URI into a normalized backend key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for URIs outside this root, for paths
    /// that escape the root and for empty paths.
    pub fn key(&self, path: &str) -> Result<String> {
        let relative = if path.contains("://") {
            path.strip_prefix(self.root.as_str())
                .filter(|rest| {
                    self.root.ends_with('/') || rest.is_empty() || rest.starts_with('/')
                })
                .ok_or_else(|| {
                    Error::InvalidInput(format!("{path} is not under store root {}", self.root))
                })?
        } else {
            path
        };
        let key = normalize_key(relative)?;
        if key.is_empty() {
            return Err(Error::InvalidInput(format!("empty path: {path:?}")));
        }
        Ok(key)
    }

    /// Returns the canonical absolute URI for a backend key.
    #[must_use]
    pub fn qualify(&self, key: &str) -> String {
        if key.is_empty() {
            self.root.clone()
        } else if self.root.ends_with('/') {
            format!("{}{key}", self.root)
        } else {
            format!("{}/{key}", self.root)
        }
    }

    /// Resolves `path` to its canonical absolute URI.
    ///
    /// # Errors
    ///
    /// See [`Self::key`].
    pub fn resolve(&self, path: &str) -> Result<String> {
        Ok(self.qualify(&self.key(path)?))
    }
}
