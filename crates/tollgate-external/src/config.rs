//! External log store configuration.

use std::sync::Arc;

use tollgate_core::ObjectStoreBackend;
use tollgate_core::config::{Settings, resolve, resolve_optional, resolve_parsed};
use tollgate_core::credentials::{CredentialsProvider, DEFAULT_CREDENTIALS_PROVIDER};
use tollgate_core::error::Result;

use crate::coordinator::ProvisionedThroughput;
use crate::storage_coordinator::StorageCoordinator;

/// `ddb.tableName`
pub const TABLE_NAME: &str = "ddb.tableName";
/// `ddb.region`
pub const REGION: &str = "ddb.region";
/// `ddb.endpoint`
pub const ENDPOINT: &str = "ddb.endpoint";
/// `credentials.provider`
pub const CREDENTIALS_PROVIDER: &str = "credentials.provider";
/// `provisionedThroughput.rcu`
pub const RCU: &str = "provisionedThroughput.rcu";
/// `provisionedThroughput.wcu`
pub const WCU: &str = "provisionedThroughput.wcu";

/// Every setting name read by [`ExternalStoreConfig::from_settings`].
pub const SETTING_NAMES: [&str; 6] = [TABLE_NAME, REGION, ENDPOINT, CREDENTIALS_PROVIDER, RCU, WCU];

/// Default coordinator table name.
pub const DEFAULT_TABLE_NAME: &str = "delta_log";
/// Default coordinator region.
pub const DEFAULT_REGION: &str = "us-east-1";
/// Key prefix of coordinator tables kept in an S3 bucket.
pub const S3_COORDINATOR_PREFIX: &str = "_tollgate_coordinator";

/// Resolved coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalStoreConfig {
    /// Coordinator table name.
    pub table_name: String,
    /// Coordinator region.
    pub region: String,
    /// Endpoint override, e.g. for a local emulator.
    pub endpoint: Option<String>,
    /// Credential source.
    pub credentials: CredentialsProvider,
    /// Capacity used when the table has to be created.
    pub throughput: ProvisionedThroughput,
}

impl Default for ExternalStoreConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            credentials: CredentialsProvider::Default,
            throughput: ProvisionedThroughput::default(),
        }
    }
}

impl ExternalStoreConfig {
    /// Resolves every setting under both key prefixes.
    ///
    /// # Errors
    ///
    /// - [`tollgate_core::Error::ConfigConflict`] if a setting has different
    ///   values under the two prefixes
    /// - [`tollgate_core::Error::InvalidConfig`] for non-numeric capacities
    /// - a storage error for an unknown credentials provider
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = ProvisionedThroughput::default();
        let config = Self {
            table_name: resolve(settings, TABLE_NAME, DEFAULT_TABLE_NAME)?,
            region: resolve(settings, REGION, DEFAULT_REGION)?,
            endpoint: resolve_optional(settings, ENDPOINT)?,
            credentials: CredentialsProvider::parse(&resolve(
                settings,
                CREDENTIALS_PROVIDER,
                DEFAULT_CREDENTIALS_PROVIDER,
            )?)?,
            throughput: ProvisionedThroughput {
                read_capacity_units: resolve_parsed(settings, RCU, defaults.read_capacity_units)?,
                write_capacity_units: resolve_parsed(
                    settings,
                    WCU,
                    defaults.write_capacity_units,
                )?,
            },
        };
        tracing::debug!(
            table = %config.table_name,
            region = %config.region,
            endpoint = ?config.endpoint,
            credentials = %config.credentials,
            "resolved external store configuration"
        );
        Ok(config)
    }

    /// Builds a coordinator whose tables live in `bucket` under
    /// [`S3_COORDINATOR_PREFIX`], reached through the configured region,
    /// endpoint and credentials.
    ///
    /// Nothing is contacted until the coordinator is first used.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the credentials cannot be initialized or the
    /// S3 client rejects the configuration.
    pub fn s3_coordinator(&self, bucket: &str) -> Result<StorageCoordinator> {
        let backend = ObjectStoreBackend::s3(
            bucket,
            Some(self.region.as_str()),
            self.endpoint.as_deref(),
            self.credentials,
        )?;
        tracing::debug!(
            bucket,
            region = %self.region,
            endpoint = ?self.endpoint,
            "using S3 coordinator"
        );
        Ok(StorageCoordinator::new(Arc::new(backend), S3_COORDINATOR_PREFIX))
    }

    /// Reads `TOLLGATE_*` environment variables, e.g. `TOLLGATE_DDB_TABLENAME`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_settings`].
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Resolves the configuration from `TOLLGATE_*` variables in `vars`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_settings`].
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        Self::from_settings(&Settings::from_vars(vars, &SETTING_NAMES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::Error;
    use tollgate_core::config::{framework_key, library_key};

    #[test]
    fn empty_settings_give_documented_defaults() {
        let config = ExternalStoreConfig::from_settings(&Settings::new()).unwrap();
        assert_eq!(config, ExternalStoreConfig::default());
        assert_eq!(config.table_name, "delta_log");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.throughput.read_capacity_units, 5);
        assert_eq!(config.throughput.write_capacity_units, 5);
    }

    #[test]
    fn settings_from_either_prefix() {
        let settings = Settings::new()
            .with(framework_key(TABLE_NAME), "commits")
            .with(library_key(REGION), "eu-west-1")
            .with(library_key(ENDPOINT), "http://localhost:8000")
            .with(
                framework_key(CREDENTIALS_PROVIDER),
                "com.amazonaws.auth.EnvironmentVariableCredentialsProvider",
            )
            .with(framework_key(RCU), "10")
            .with(library_key(RCU), "10")
            .with(library_key(WCU), "20");

        let config = ExternalStoreConfig::from_settings(&settings).unwrap();
        assert_eq!(config.table_name, "commits");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:8000"));
        assert_eq!(config.credentials, CredentialsProvider::Environment);
        assert_eq!(config.throughput.read_capacity_units, 10);
        assert_eq!(config.throughput.write_capacity_units, 20);
    }

    #[test]
    fn conflicting_table_names_fail() {
        let settings = Settings::new()
            .with(framework_key(TABLE_NAME), "a")
            .with(library_key(TABLE_NAME), "b");
        assert!(matches!(
            ExternalStoreConfig::from_settings(&settings),
            Err(Error::ConfigConflict { .. })
        ));
    }

    #[test]
    fn unknown_credentials_provider_fails_construction() {
        let settings = Settings::new().with(library_key(CREDENTIALS_PROVIDER), "com.example.Nope");
        assert!(matches!(
            ExternalStoreConfig::from_settings(&settings),
            Err(Error::Storage { .. })
        ));
    }

    #[test]
    fn s3_coordinator_uses_the_configured_client() {
        let config = ExternalStoreConfig {
            endpoint: Some("http://localhost:4566".into()),
            credentials: CredentialsProvider::Anonymous,
            ..ExternalStoreConfig::default()
        };
        let coordinator = config.s3_coordinator("bucket").unwrap();
        assert!(format!("{coordinator:?}").contains(S3_COORDINATOR_PREFIX));
    }

    #[test]
    fn environment_variables_map_to_settings() {
        let vars = [
            ("TOLLGATE_DDB_TABLENAME", "env_commits"),
            ("TOLLGATE_PROVISIONEDTHROUGHPUT_WCU", "7"),
            ("TOLLGATE_UNRELATED", "x"),
            ("DDB_REGION", "ignored"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));

        let config = ExternalStoreConfig::from_vars(vars).unwrap();
        assert_eq!(config.table_name, "env_commits");
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.throughput.write_capacity_units, 7);
        assert_eq!(config.throughput.read_capacity_units, 5);
    }

    #[test]
    fn from_env_resolves_in_a_clean_environment() {
        let clean = std::env::vars().all(|(k, _)| !k.starts_with("TOLLGATE_"));
        if clean {
            assert_eq!(ExternalStoreConfig::from_env().unwrap(), ExternalStoreConfig::default());
        }
    }

    #[test]
    fn non_numeric_capacity_is_invalid() {
        let settings = Settings::new().with(library_key(WCU), "lots");
        assert!(matches!(
            ExternalStoreConfig::from_settings(&settings),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
