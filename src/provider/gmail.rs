//! Gmail REST client: the production `MailProvider`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Label, MailProvider, ProviderMessage, auth};
use crate::config::Config;
use crate::error::{Error, ProviderError};
use crate::pipeline::types::LabelMutation;

/// Gmail API client bound to one authenticated account.
pub struct GmailClient {
    client: Client,
    base_url: String,
    access_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListLabelsResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

/// HTTP client shared by token refresh and API calls.
fn http_client() -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ProviderError::Request {
            operation: "build http client".into(),
            reason: e.to_string(),
        })
}

impl GmailClient {
    pub fn new(base_url: &str, access_token: SecretString) -> Result<Self, ProviderError> {
        Ok(Self::with_client(http_client()?, base_url, access_token))
    }

    fn with_client(client: Client, base_url: &str, access_token: SecretString) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    /// Authenticate from the configured token files and build a client.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let http = http_client()?;
        let token =
            auth::load_access_token(&http, &config.tokens_file, &config.credentials_file).await?;
        Ok(Self::with_client(http, &config.api_base, token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, ProviderError> {
        let resp = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                operation: operation.into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            operation: operation.into(),
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let resp = self.send(operation, request).await?;
        resp.json().await.map_err(|e| ProviderError::Decode {
            operation: operation.into(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_message_ids(
        &self,
        label: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let max_results = max_results.to_string();
        let request = self
            .client
            .get(self.url("messages"))
            .query(&[("labelIds", label), ("maxResults", max_results.as_str())]);
        let list: ListMessagesResponse = self.send_json("list messages", request).await?;
        debug!(count = list.messages.len(), label, "Listed message ids");
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<ProviderMessage, ProviderError> {
        validate_message_id(id)?;
        let request = self
            .client
            .get(self.url(&format!("messages/{id}")))
            .query(&[("format", "full")]);
        match self.send_json("get message", request).await {
            Err(ProviderError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(ProviderError::MessageNotFound(id.to_string()))
            }
            other => other,
        }
    }

    async fn modify_labels(
        &self,
        id: &str,
        mutation: &LabelMutation,
    ) -> Result<(), ProviderError> {
        validate_message_id(id)?;
        let request = self
            .client
            .post(self.url(&format!("messages/{id}/modify")))
            .json(&modify_body(mutation));
        self.send("modify message", request).await?;
        debug!(id, add = ?mutation.add_labels, remove = ?mutation.remove_labels, "Labels modified");
        Ok(())
    }

    async fn trash(&self, id: &str) -> Result<(), ProviderError> {
        validate_message_id(id)?;
        let request = self.client.post(self.url(&format!("messages/{id}/trash")));
        self.send("trash message", request).await?;
        debug!(id, "Message trashed");
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, ProviderError> {
        let request = self.client.get(self.url("labels"));
        let list: ListLabelsResponse = self.send_json("list labels", request).await?;
        Ok(list.labels)
    }

    async fn create_label(&self, name: &str) -> Result<Label, ProviderError> {
        let request = self
            .client
            .post(self.url("labels"))
            .json(&create_label_body(name));
        self.send_json("create label", request).await
    }
}

/// Ids are interpolated into the URL path.
fn validate_message_id(id: &str) -> Result<(), ProviderError> {
    if id.is_empty() || id.contains(['/', '\\', '?', '#']) || id.contains("..") {
        return Err(ProviderError::Request {
            operation: "validate message id".into(),
            reason: format!("invalid message id {id:?}"),
        });
    }
    Ok(())
}

/// JSON body for `messages/{id}/modify`; empty sets are omitted.
fn modify_body(mutation: &LabelMutation) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if !mutation.add_labels.is_empty() {
        body.insert("addLabelIds".into(), serde_json::json!(mutation.add_labels));
    }
    if !mutation.remove_labels.is_empty() {
        body.insert(
            "removeLabelIds".into(),
            serde_json::json!(mutation.remove_labels),
        );
    }
    serde_json::Value::Object(body)
}

fn create_label_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "labelListVisibility": "labelShow",
        "messageListVisibility": "show",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    #[test]
    fn modify_body_omits_empty_sets() {
        let mut mutation = LabelMutation::default();
        mutation.remove("UNREAD");
        let body = modify_body(&mutation);
        assert_eq!(body, serde_json::json!({"removeLabelIds": ["UNREAD"]}));

        mutation.add("Label_7");
        mutation.remove("INBOX");
        let body = modify_body(&mutation);
        assert_eq!(body["addLabelIds"], serde_json::json!(["Label_7"]));
        assert_eq!(body["removeLabelIds"], serde_json::json!(["INBOX", "UNREAD"]));
    }

    #[test]
    fn create_label_uses_default_visibility() {
        let body = create_label_body("Work");
        assert_eq!(body["name"], "Work");
        assert_eq!(body["labelListVisibility"], "labelShow");
        assert_eq!(body["messageListVisibility"], "show");
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(validate_message_id("18f2a").is_ok());
        assert!(validate_message_id("").is_err());
        assert!(validate_message_id("../labels").is_err());
        assert!(validate_message_id("a/b").is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = GmailClient::new("https://example.test/v1/", SecretString::from("t")).unwrap();
        assert_eq!(client.url("labels"), "https://example.test/v1/labels");
    }

    #[tokio::test]
    async fn connect_without_token_file_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            tokens_file: dir.path().join("token.json"),
            credentials_file: dir.path().join("credentials.json"),
            ..Default::default()
        };
        let result = GmailClient::connect(&config).await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::MissingTokenFile { .. }))
        ));
    }
}
