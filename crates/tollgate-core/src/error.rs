//! Error types and result aliases for tollgate.
//!
//! One error enum is shared by every crate in the workspace so that failures
//! from the coordinator and from the object store reach the log-store caller
//! unchanged in kind. The only translation the protocol performs is a claim
//! conflict becoming [`Error::AlreadyExists`].

/// The result type used throughout tollgate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tollgate operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target file already exists, or another writer holds the claim on it.
    ///
    /// This is the expected signal for concurrent writers racing on the same
    /// commit and is never logged as an error.
    #[error("file already exists: {path}")]
    AlreadyExists {
        /// Fully qualified path of the contested file.
        path: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage or coordinator operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A commit was claimed in the coordinator but could not be materialized.
    ///
    /// The claim stays incomplete; recovery completes it from its own staged
    /// object the next time the table is listed, read or written.
    #[error("commit {path} claimed but not materialized: {message}")]
    CommitIncomplete {
        /// Fully qualified path of the claimed file.
        path: String,
        /// Description of the failure that interrupted the commit.
        message: String,
        /// The underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// The same setting was configured under both prefixes with different values.
    #[error(
        "configuration properties `{framework_key}={framework_value}` and \
         `{library_key}={library_value}` have different values; set only one"
    )]
    ConfigConflict {
        /// Framework-scoped key.
        framework_key: String,
        /// Value under the framework-scoped key.
        framework_value: String,
        /// Library-scoped key.
        library_key: String,
        /// Value under the library-scoped key.
        library_value: String,
    },

    /// A configuration value could not be interpreted.
    #[error("invalid configuration `{key}`: {message}")]
    InvalidConfig {
        /// The offending key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },

    /// The coordinator table reported a status the bootstrapper does not handle.
    #[error("coordinator table `{table}` has unexpected status `{status}`")]
    UnexpectedTableStatus {
        /// Coordinator table name.
        table: String,
        /// Status string reported by the coordinator.
        status: String,
    },

    /// The coordinator table did not become active within the retry budget.
    #[error("coordinator table `{table}` not active after {attempts} attempts")]
    BootstrapTimeout {
        /// Coordinator table name.
        table: String,
        /// Number of describe attempts made.
        attempts: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an already-exists error for `path`.
    #[must_use]
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true for the claim-conflict / file-exists signal.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true when the error reports a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
