//! Dual-prefixed configuration resolution.
//!
//! Every setting may be supplied under a framework-scoped key
//! (`spark.io.delta.storage.S3DynamoDBLogStore.<name>`) or a library-scoped
//! key (`io.delta.storage.S3DynamoDBLogStore.<name>`). The prefixes match the
//! keys existing deployments already carry, so their configuration can be
//! handed over unchanged.
//!
//! Resolution rules:
//! - both present and different: [`Error::ConfigConflict`] naming both;
//! - one present (or both equal): that value;
//! - neither: the caller's default.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Framework-scoped key prefix.
pub const FRAMEWORK_PREFIX: &str = "spark.io.delta.storage.S3DynamoDBLogStore";

/// Library-scoped key prefix.
pub const LIBRARY_PREFIX: &str = "io.delta.storage.S3DynamoDBLogStore";

/// Prefix of environment variables read by [`Settings::from_env_prefixed`].
pub const ENV_PREFIX: &str = "TOLLGATE_";

/// Flat key/value settings handed in by the embedding engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key` to `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Reads `TOLLGATE_*` environment variables into library-scoped keys.
    ///
    /// `TOLLGATE_DDB_TABLENAME` becomes
    /// `io.delta.storage.S3DynamoDBLogStore.ddb.tableName`: the variable name
    /// after the prefix is matched case-insensitively against `known_names`
    /// with `.` replaced by `_`.
    #[must_use]
    pub fn from_env_prefixed(known_names: &[&str]) -> Self {
        Self::from_vars(std::env::vars(), known_names)
    }

    /// Same as [`Self::from_env_prefixed`] over an explicit variable list.
    #[must_use]
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
        known_names: &[&str],
    ) -> Self {
        let mut settings = Self::new();
        for (var, value) in vars {
            let Some(suffix) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if let Some(name) = known_names
                .iter()
                .find(|name| name.replace('.', "_").eq_ignore_ascii_case(suffix))
            {
                settings.set(library_key(name), value);
            }
        }
        settings
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Returns the framework-scoped key for `name`.
#[must_use]
pub fn framework_key(name: &str) -> String {
    format!("{FRAMEWORK_PREFIX}.{name}")
}

/// Returns the library-scoped key for `name`.
#[must_use]
pub fn library_key(name: &str) -> String {
    format!("{LIBRARY_PREFIX}.{name}")
}

/// Resolves `name` under both prefixes, returning `None` when neither is set.
///
/// # Errors
///
/// Returns [`Error::ConfigConflict`] when both keys are set to different values.
pub fn resolve_optional(settings: &Settings, name: &str) -> Result<Option<String>> {
    let framework_key = framework_key(name);
    let library_key = library_key(name);

    match (settings.get(&framework_key), settings.get(&library_key)) {
        (Some(framework), Some(library)) if framework != library => Err(Error::ConfigConflict {
            framework_key,
            framework_value: framework.to_string(),
            library_key,
            library_value: library.to_string(),
        }),
        (Some(value), _) | (None, Some(value)) => Ok(Some(value.to_string())),
        (None, None) => Ok(None),
    }
}

/// Resolves `name` under both prefixes, falling back to `default`.
///
/// # Errors
///
/// Returns [`Error::ConfigConflict`] when both keys are set to different values.
pub fn resolve(settings: &Settings, name: &str, default: &str) -> Result<String> {
    Ok(resolve_optional(settings, name)?.unwrap_or_else(|| default.to_string()))
}

/// Resolves and parses `name`, falling back to `default`.
///
/// # Errors
///
/// Returns [`Error::ConfigConflict`] on conflicting values and
/// [`Error::InvalidConfig`] when the value does not parse.
pub fn resolve_parsed<T>(settings: &Settings, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match resolve_optional(settings, name)? {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| Error::InvalidConfig {
            key: name.to_string(),
            message: format!("cannot parse {raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "provisionedThroughput.rcu";

    #[test]
    fn equal_values_under_both_prefixes_resolve() {
        let settings = Settings::new()
            .with(framework_key(NAME), "5")
            .with(library_key(NAME), "5");
        assert_eq!(resolve(&settings, NAME, "1").unwrap(), "5");
    }

    #[test]
    fn different_values_conflict_naming_both() {
        let settings = Settings::new()
            .with(framework_key(NAME), "5")
            .with(library_key(NAME), "7");
        match resolve(&settings, NAME, "1").unwrap_err() {
            Error::ConfigConflict {
                framework_key,
                framework_value,
                library_key,
                library_value,
            } => {
                assert_eq!(framework_key, format!("{FRAMEWORK_PREFIX}.{NAME}"));
                assert_eq!(framework_value, "5");
                assert_eq!(library_key, format!("{LIBRARY_PREFIX}.{NAME}"));
                assert_eq!(library_value, "7");
            }
            other => panic!("expected ConfigConflict, got {other:?}"),
        }
    }

    #[test]
    fn single_prefix_wins_over_default() {
        let framework_only = Settings::new().with(framework_key(NAME), "9");
        assert_eq!(resolve(&framework_only, NAME, "1").unwrap(), "9");

        let library_only = Settings::new().with(library_key(NAME), "8");
        assert_eq!(resolve(&library_only, NAME, "1").unwrap(), "8");
    }

    #[test]
    fn neither_prefix_uses_default() {
        assert_eq!(resolve(&Settings::new(), NAME, "5").unwrap(), "5");
        assert_eq!(resolve_optional(&Settings::new(), NAME).unwrap(), None);
    }

    #[test]
    fn parsed_values_report_bad_input() {
        let settings = Settings::new().with(library_key(NAME), "ten");
        let err = resolve_parsed::<u64>(&settings, NAME, 5).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == NAME));

        let settings = Settings::new().with(library_key(NAME), " 12 ");
        assert_eq!(resolve_parsed::<u64>(&settings, NAME, 5).unwrap(), 12);
    }

    #[test]
    fn env_vars_map_to_library_keys() {
        let vars = vec![
            ("TOLLGATE_DDB_TABLENAME".to_string(), "commits".to_string()),
            ("TOLLGATE_UNKNOWN".to_string(), "x".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let settings = Settings::from_vars(vars.into_iter(), &["ddb.tableName", "ddb.region"]);
        assert_eq!(settings.get(&library_key("ddb.tableName")), Some("commits"));
        assert_eq!(settings.get(&library_key("ddb.region")), None);
        assert_eq!(settings, Settings::from_iter([(library_key("ddb.tableName"), "commits")]));
    }
}
