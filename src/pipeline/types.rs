//! Shared pipeline types: stored email records and label mutations.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Fixed timestamp layout for stored `received_at` values.
pub const RECEIVED_AT_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Provider system labels touched by the reconciliation engine.
pub const LABEL_UNREAD: &str = "UNREAD";
pub const LABEL_STARRED: &str = "STARRED";
pub const LABEL_IMPORTANT: &str = "IMPORTANT";
pub const LABEL_INBOX: &str = "INBOX";

/// One stored message, keyed by the provider message id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailRecord {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// `DD/MM/YYYY HH:MM:SS` at +05:30, or the raw header when unparseable.
    pub received_at: String,
}

impl EmailRecord {
    /// Value of a record attribute, by field.
    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Id => &self.id,
            Field::Sender => &self.sender,
            Field::Recipient => &self.recipient,
            Field::Subject => &self.subject,
            Field::Body => &self.body,
            Field::ReceivedAt => &self.received_at,
        }
    }
}

/// A record attribute a condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Sender,
    Recipient,
    Subject,
    Body,
    ReceivedAt,
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" | "gmail_id" => Ok(Self::Id),
            "sender" | "from" => Ok(Self::Sender),
            "recipient" | "to" => Ok(Self::Recipient),
            "subject" => Ok(Self::Subject),
            "body" | "message" => Ok(Self::Body),
            "received_at" | "receivedat" | "date" => Ok(Self::ReceivedAt),
            other => Err(format!("unknown field '{other}'")),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Id => "id",
            Self::Sender => "sender",
            Self::Recipient => "recipient",
            Self::Subject => "subject",
            Self::Body => "body",
            Self::ReceivedAt => "received_at",
        };
        f.write_str(name)
    }
}

/// Aggregated label changes for one message, sent as a single modify call.
///
/// Staging is last-writer-wins: adding a label drops a pending removal of the
/// same label and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMutation {
    pub add_labels: BTreeSet<String>,
    pub remove_labels: BTreeSet<String>,
}

impl LabelMutation {
    pub fn add(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.remove_labels.remove(&label);
        self.add_labels.insert(label);
    }

    pub fn remove(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.add_labels.remove(&label);
        self.remove_labels.insert(label);
    }

    pub fn is_empty(&self) -> bool {
        self.add_labels.is_empty() && self.remove_labels.is_empty()
    }
}
