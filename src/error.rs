//! Error types for inbox-rules.
//!
//! Fatal kinds (`AuthError`, `ConfigError`, `StoreError`) convert into the
//! top-level [`Error`] and end the run. Recoverable kinds are handled at the
//! smallest unit of work (one message, one condition, one action) and logged.

use std::path::PathBuf;

/// Top-level error type for a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Failures obtaining an authenticated provider handle.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token file {path} not found. Authorize the account and save its token first")]
    MissingTokenFile { path: PathBuf },

    #[error("Invalid token file {path}: {reason}")]
    InvalidTokenFile { path: PathBuf, reason: String },

    #[error("No client credentials available for token refresh: {0}")]
    MissingClientCredentials(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and rule-document errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read rules file {path}: {source}")]
    RulesFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse rules document: {0}")]
    ParseError(String),

    #[error("Invalid rule set #{index}: {reason}")]
    InvalidRuleSet { index: usize, reason: String },
}

/// Message Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema setup failed: {0}")]
    Schema(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// A single provider call failed.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{operation} request failed: {reason}")]
    Request { operation: String, reason: String },

    #[error("{operation} failed ({status}): {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an unreadable response: {reason}")]
    Decode { operation: String, reason: String },

    #[error("Message {0} not found")]
    MessageNotFound(String),
}

/// A provider date header did not match the expected layout.
#[derive(Debug, thiserror::Error)]
#[error("Unparseable date '{raw}': {reason}")]
pub struct DateParseError {
    pub raw: String,
    pub reason: String,
}

/// Condition-level failures; the condition evaluates to false.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Unsupported time unit: {0}")]
    UnsupportedUnit(String),

    #[error("Invalid age threshold '{0}'")]
    InvalidThreshold(String),
}

/// One action in a rule set's list could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Could not resolve label '{label}': {source}")]
    LabelResolution {
        label: String,
        source: ProviderError,
    },

    #[error("Trash failed: {0}")]
    Trash(ProviderError),

    #[error("Label update failed: {0}")]
    Modify(ProviderError),
}

/// One message could not be ingested; the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ProviderError),

    #[error("persist failed: {0}")]
    Persist(#[from] StoreError),
}

/// Result type alias for a run.
pub type Result<T> = std::result::Result<T, Error>;
