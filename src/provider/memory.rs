//! In-process `MailProvider` with a call journal.
//!
//! Keeps messages, labels and per-message label state in memory and records
//! every call, so runs can be replayed and asserted on without a network.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Label, MailProvider, ProviderMessage};
use crate::error::ProviderError;
use crate::pipeline::types::{LABEL_INBOX, LABEL_UNREAD, LabelMutation};

const LABEL_TRASH: &str = "TRASH";

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    ListMessageIds { label: String, max_results: u32 },
    GetMessage(String),
    ModifyLabels {
        id: String,
        add: BTreeSet<String>,
        remove: BTreeSet<String>,
    },
    Trash(String),
    ListLabels,
    CreateLabel(String),
}

#[derive(Default)]
struct State {
    messages: Vec<ProviderMessage>,
    message_labels: HashMap<String, BTreeSet<String>>,
    labels: Vec<Label>,
    next_label: usize,
    calls: Vec<ProviderCall>,
    failing_ids: HashSet<String>,
    fail_listing: bool,
    fail_label_listing: bool,
}

/// In-memory provider.
#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<State>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a message to the inbox, unread.
    pub fn add_message(&self, message: ProviderMessage) {
        let mut state = self.state();
        state.message_labels.insert(
            message.id.clone(),
            [LABEL_INBOX, LABEL_UNREAD].map(String::from).into(),
        );
        state.messages.push(message);
    }

    /// Register an existing user label.
    pub fn add_label(&self, name: &str) -> Label {
        let mut state = self.state();
        new_label(&mut state, name)
    }

    /// Every call touching `id` fails from now on.
    pub fn fail_message(&self, id: &str) {
        self.state().failing_ids.insert(id.to_string());
    }

    /// The message listing call fails from now on.
    pub fn fail_listing(&self) {
        self.state().fail_listing = true;
    }

    /// The label listing call fails from now on.
    pub fn fail_label_listing(&self) {
        self.state().fail_label_listing = true;
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Current labels on a message.
    pub fn labels_of(&self, id: &str) -> BTreeSet<String> {
        self.state()
            .message_labels
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// All user and system labels created so far.
    pub fn labels(&self) -> Vec<Label> {
        self.state().labels.clone()
    }
}

fn new_label(state: &mut State, name: &str) -> Label {
    state.next_label += 1;
    let label = Label {
        id: format!("Label_{}", state.next_label),
        name: name.to_string(),
    };
    state.labels.push(label.clone());
    label
}

fn check_id(state: &State, operation: &str, id: &str) -> Result<(), ProviderError> {
    if state.failing_ids.contains(id) {
        return Err(ProviderError::Status {
            operation: operation.into(),
            status: 500,
            body: format!("injected failure for {id}"),
        });
    }
    if !state.message_labels.contains_key(id) {
        return Err(ProviderError::MessageNotFound(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl MailProvider for InMemoryProvider {
    async fn list_message_ids(
        &self,
        label: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::ListMessageIds {
            label: label.to_string(),
            max_results,
        });
        if state.fail_listing {
            return Err(ProviderError::Request {
                operation: "list messages".into(),
                reason: "injected failure".into(),
            });
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                state
                    .message_labels
                    .get(&m.id)
                    .is_some_and(|labels| labels.contains(label))
            })
            .take(max_results as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<ProviderMessage, ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::GetMessage(id.to_string()));
        check_id(&state, "get message", id)?;
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::MessageNotFound(id.to_string()))
    }

    async fn modify_labels(
        &self,
        id: &str,
        mutation: &LabelMutation,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::ModifyLabels {
            id: id.to_string(),
            add: mutation.add_labels.clone(),
            remove: mutation.remove_labels.clone(),
        });
        check_id(&state, "modify message", id)?;
        if let Some(labels) = state.message_labels.get_mut(id) {
            labels.extend(mutation.add_labels.iter().cloned());
            labels.retain(|l| !mutation.remove_labels.contains(l));
        }
        Ok(())
    }

    async fn trash(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::Trash(id.to_string()));
        check_id(&state, "trash message", id)?;
        if let Some(labels) = state.message_labels.get_mut(id) {
            labels.remove(LABEL_INBOX);
            labels.insert(LABEL_TRASH.to_string());
        }
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::ListLabels);
        if state.fail_label_listing {
            return Err(ProviderError::Request {
                operation: "list labels".into(),
                reason: "injected failure".into(),
            });
        }
        Ok(state.labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<Label, ProviderError> {
        let mut state = self.state();
        state.calls.push(ProviderCall::CreateLabel(name.to_string()));
        Ok(new_label(&mut state, name))
    }
}
