//! Core error types for cailo-core.
//!
//! This module defines the error hierarchy using thiserror. Store and
//! delivery failures are absorbed (logged) by the coordinator; the other
//! variants surface to callers such as the CLI or the control surface.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::TabId;

/// Core error type for cailo-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persisted store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The coordinator refused an edit
    #[error("Edit rejected: {0}")]
    Edit(#[from] EditError),

    /// The coordinator task has stopped and its mailbox is closed
    #[error("Coordinator is no longer running")]
    CoordinatorGone,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the backing database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked by another writer
    #[error("Store is locked")]
    Locked,

    /// A stored value does not decode into the expected shape
    #[error("Malformed value under key '{key}': {message}")]
    Malformed { key: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not find a home directory to put the data directory under
    #[error("Could not determine the data directory")]
    NoDataDir,

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not exist in the configuration
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Input validation errors raised at the control-surface boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing was typed
    #[error("Please enter a domain name")]
    EmptyDomain,

    /// Input is not a plausible host name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// The domain is already in the local replica's rule list
    #[error("{0} is already in the list")]
    AlreadyListed(String),
}

/// Reasons the coordinator rejects an `apply-edit`.
///
/// Rejections travel back over the message channel, so they are serializable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EditError {
    #[error("{domain} is already blocked")]
    DuplicateDomain { domain: String },

    #[error("{domain} is not in the block list")]
    UnknownDomain { domain: String },

    #[error("invalid domain '{input}': {message}")]
    InvalidDomain { input: String, message: String },

    #[error("state changed since revision {expected} (now {current}); reload and retry")]
    StaleRevision { expected: u64, current: u64 },
}

/// Failure to reach another context over the message channel.
///
/// Expected whenever the receiving page or panel is not alive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no receiver is listening")]
    NoReceiver,

    #[error("no page monitor attached to tab {0}")]
    UnknownTab(TabId),

    #[error("channel closed")]
    Closed,
}

/// Failure of a host tab operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("tab {0} no longer exists")]
    TabGone(TabId),

    #[error("host unavailable: {0}")]
    Unavailable(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<ValidationError> for EditError {
    fn from(err: ValidationError) -> Self {
        let input = match &err {
            ValidationError::InvalidDomain(input) | ValidationError::AlreadyListed(input) => {
                input.clone()
            }
            ValidationError::EmptyDomain => String::new(),
        };
        EditError::InvalidDomain {
            input,
            message: err.to_string(),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
