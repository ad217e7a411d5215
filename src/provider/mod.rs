//! Provider Client: the capability set the core needs from the mail provider.
//!
//! Authentication is the client's business; the pipeline only ever sees an
//! already-authenticated [`MailProvider`].

pub mod auth;
pub mod gmail;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::pipeline::types::LabelMutation;

pub use gmail::GmailClient;
pub use memory::InMemoryProvider;

/// Operations over the provider's message store.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// List up to `max_results` message ids carrying `label`, newest first.
    async fn list_message_ids(
        &self,
        label: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError>;

    /// Fetch a full message with headers and body payload.
    async fn get_message(&self, id: &str) -> Result<ProviderMessage, ProviderError>;

    /// Add and remove labels on a message in one call.
    async fn modify_labels(&self, id: &str, mutation: &LabelMutation)
    -> Result<(), ProviderError>;

    /// Move a message to the trash.
    async fn trash(&self, id: &str) -> Result<(), ProviderError>;

    /// List all labels of the account.
    async fn list_labels(&self) -> Result<Vec<Label>, ProviderError>;

    /// Create a user label with default visibility.
    async fn create_label(&self, name: &str) -> Result<Label, ProviderError>;
}

/// A provider label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// A fetched message, as the provider returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub id: String,
    #[serde(default)]
    pub payload: MessagePayload,
}

/// Top-level MIME payload of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// A nested MIME part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// Body data of a payload or part, base64url encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// A single message header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
