//! Credential-provider selection by name.
//!
//! Configuration names a provider with a string. Short names and the class
//! names older deployments used are both accepted; anything else fails
//! construction with an I/O-class [`Error::Storage`].

use std::fmt;

use crate::error::{Error, Result};

/// Name used when no provider is configured.
pub const DEFAULT_CREDENTIALS_PROVIDER: &str = "default";

/// Where cloud credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsProvider {
    /// Environment variables, then web identity and instance metadata.
    #[default]
    Default,
    /// Only `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`.
    Environment,
    /// Unsigned requests.
    Anonymous,
}

/// The configured provider name is not known.
#[derive(Debug, thiserror::Error)]
#[error("unknown credentials provider `{0}`")]
pub struct UnknownCredentialsProvider(pub String);

impl CredentialsProvider {
    /// Parses a provider name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] wrapping [`UnknownCredentialsProvider`] for
    /// unrecognized names.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            "default" | "com.amazonaws.auth.DefaultAWSCredentialsProviderChain" => {
                Ok(Self::Default)
            }
            "environment" | "com.amazonaws.auth.EnvironmentVariableCredentialsProvider" => {
                Ok(Self::Environment)
            }
            "anonymous" | "com.amazonaws.auth.AnonymousAWSCredentials" => Ok(Self::Anonymous),
            other => Err(Error::storage_with_source(
                "failed to initialize credentials",
                UnknownCredentialsProvider(other.to_string()),
            )),
        }
    }

    /// Returns the canonical short name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Environment => "environment",
            Self::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for CredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_legacy_names() {
        assert_eq!(CredentialsProvider::parse("default").unwrap(), CredentialsProvider::Default);
        assert_eq!(
            CredentialsProvider::parse("com.amazonaws.auth.DefaultAWSCredentialsProviderChain")
                .unwrap(),
            CredentialsProvider::Default
        );
        assert_eq!(
            CredentialsProvider::parse(" environment ").unwrap(),
            CredentialsProvider::Environment
        );
        assert_eq!(CredentialsProvider::parse("anonymous").unwrap(), CredentialsProvider::Anonymous);
    }

    #[test]
    fn unknown_name_is_io_class_failure() {
        let err = CredentialsProvider::parse("com.example.Nope").unwrap_err();
        let Error::Storage { source, .. } = &err else {
            panic!("expected storage error, got {err:?}");
        };
        let source = source.as_ref().expect("source");
        assert!(source.to_string().contains("com.example.Nope"));
    }
}
