//! OAuth token handling for the Gmail client.
//!
//! Reads an authorized-user token file, refreshes the access token with the
//! refresh-token grant when it is missing or about to expire, and writes the
//! refreshed token back. The interactive consent flow is not handled here:
//! the token file has to exist already.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, TimeDelta, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AuthError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh when the token expires within this window.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// On-disk authorized-user token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub expiry: Option<String>,
    /// Fields we don't interpret (scopes, account, ...) survive a rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenFile {
    /// Parsed expiry, if present and readable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|ndt| ndt.and_utc())
    }

    /// Whether the access token has to be refreshed before use.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.token.as_deref().is_none_or(str::is_empty) {
            return true;
        }
        match self.expires_at() {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }
}

/// OAuth client secrets file, `installed` or `web` flavour.
#[derive(Debug, Deserialize)]
struct ClientSecrets {
    installed: Option<ClientSecretEntry>,
    web: Option<ClientSecretEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecretEntry {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Return a usable access token, refreshing and persisting it if needed.
pub async fn load_access_token(
    http: &reqwest::Client,
    tokens_file: &Path,
    credentials_file: &Path,
) -> Result<SecretString, AuthError> {
    let mut token = read_token_file(tokens_file).await?;

    if !token.needs_refresh(Utc::now()) {
        debug!(path = %tokens_file.display(), "Using stored access token");
        return Ok(SecretString::from(token.token.unwrap_or_default()));
    }

    let refresh_token = token
        .refresh_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidTokenFile {
            path: tokens_file.to_path_buf(),
            reason: "access token expired and no refresh_token present".into(),
        })?;

    let client = resolve_client(&token, credentials_file).await?;
    let token_uri = token
        .token_uri
        .clone()
        .or(client.token_uri.clone())
        .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

    let resp = http
        .post(&token_uri)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!("{status}: {body}")));
    }

    let refreshed: RefreshResponse = resp
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("unreadable token response: {e}")))?;

    token.expiry = refreshed
        .expires_in
        .map(|secs| expiry_after(Utc::now(), secs))
        .transpose()?;
    token.token = Some(refreshed.access_token.clone());
    write_token_file(tokens_file, &token).await?;
    info!(path = %tokens_file.display(), "Access token refreshed");

    Ok(SecretString::from(refreshed.access_token))
}

/// RFC 3339 expiry `expires_in` seconds after `now`.
fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> Result<String, AuthError> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(|expiry| expiry.to_rfc3339())
        .ok_or_else(|| AuthError::RefreshFailed(format!("expires_in out of range: {expires_in}")))
}

/// Read and parse the token file.
pub async fn read_token_file(path: &Path) -> Result<TokenFile, AuthError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::MissingTokenFile {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(AuthError::Io(e)),
    };
    serde_json::from_str(&raw).map_err(|e| AuthError::InvalidTokenFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn write_token_file(path: &Path, token: &TokenFile) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(token).map_err(|e| AuthError::InvalidTokenFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Client id/secret from the token file, else from the client secrets file.
async fn resolve_client(
    token: &TokenFile,
    credentials_file: &Path,
) -> Result<ClientSecretEntry, AuthError> {
    if let (Some(id), Some(secret)) = (&token.client_id, &token.client_secret) {
        return Ok(ClientSecretEntry {
            client_id: id.clone(),
            client_secret: secret.clone(),
            token_uri: None,
        });
    }

    let raw = tokio::fs::read_to_string(credentials_file)
        .await
        .map_err(|e| {
            AuthError::MissingClientCredentials(format!("{}: {e}", credentials_file.display()))
        })?;
    let secrets: ClientSecrets = serde_json::from_str(&raw).map_err(|e| {
        AuthError::MissingClientCredentials(format!("{}: {e}", credentials_file.display()))
    })?;
    secrets.installed.or(secrets.web).ok_or_else(|| {
        AuthError::MissingClientCredentials(format!(
            "{} has neither an 'installed' nor a 'web' section",
            credentials_file.display()
        ))
    })
}
