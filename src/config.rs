//! Configuration types.
//!
//! Built once at process entry and passed down explicitly; nothing in the
//! pipeline reads the environment on its own.

use std::path::PathBuf;

use regex::Regex;

use crate::error::ConfigError;

/// Default Gmail REST endpoint for the authenticated user.
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file backing the Message Store.
    pub db_path: PathBuf,
    /// Message Store table name.
    pub table_name: String,
    /// Maximum number of messages listed per ingestion run.
    pub batch_size: u32,
    /// Label whose messages are ingested.
    pub inbox_folder: String,
    /// Rule document path.
    pub rules_file: PathBuf,
    /// Authorized-user token file.
    pub tokens_file: PathBuf,
    /// OAuth client secrets, consulted when the token file lacks them.
    pub credentials_file: PathBuf,
    /// Failure log written by ingestion runs.
    pub fetch_log_file: PathBuf,
    /// Failure log written by processing runs.
    pub process_log_file: PathBuf,
    /// Provider REST base URL.
    pub api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("emails.db"),
            table_name: "Emails".to_string(),
            batch_size: 50,
            inbox_folder: "INBOX".to_string(),
            rules_file: PathBuf::from("rules.json"),
            tokens_file: PathBuf::from("token.json"),
            credentials_file: PathBuf::from("credentials.json"),
            fetch_log_file: PathBuf::from("fetch_emails.log"),
            process_log_file: PathBuf::from("process_emails.log"),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl Config {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let path = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);

        let batch_size = match var("EMAIL_SIZE") {
            Some(raw) => parse_batch_size(&raw)?,
            None => defaults.batch_size,
        };

        let table_name = var("TABLE_NAME").unwrap_or(defaults.table_name);
        validate_table_name(&table_name)?;

        Ok(Self {
            db_path: path("DB_NAME", defaults.db_path),
            table_name,
            batch_size,
            inbox_folder: var("INBOX_FOLDER").unwrap_or(defaults.inbox_folder),
            rules_file: path("RULES_FILE", defaults.rules_file),
            tokens_file: path("TOKENS_FILE", defaults.tokens_file),
            credentials_file: path("CREDENTIALS_FILE", defaults.credentials_file),
            fetch_log_file: path("FETCH_LOG_FILE", defaults.fetch_log_file),
            process_log_file: path("PROCESS_LOG_FILE", defaults.process_log_file),
            api_base: var("GMAIL_API_BASE").unwrap_or(defaults.api_base),
        })
    }
}

/// Parse a positive batch size.
pub fn parse_batch_size(raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: "EMAIL_SIZE".into(),
            message: "must be at least 1".into(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::InvalidValue {
            key: "EMAIL_SIZE".into(),
            message: format!("'{raw}' is not a positive integer: {e}"),
        }),
    }
}

/// The table name is interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let ident = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| ConfigError::InvalidValue {
        key: "TABLE_NAME".into(),
        message: e.to_string(),
    })?;
    if ident.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: "TABLE_NAME".into(),
            message: format!("'{name}' is not a valid SQL identifier"),
        })
    }
}
