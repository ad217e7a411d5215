//! Action reconciliation: turns a matched rule set's actions into provider
//! calls for one message.
//!
//! Label changes from the whole action list are staged and sent as a single
//! modify call. Trash is issued immediately and stages nothing. One failing
//! action is logged and does not stop the others.

use tracing::{debug, warn};

use crate::error::{ActionError, ProviderError};
use crate::pipeline::rules::ActionSpec;
use crate::pipeline::types::{
    LABEL_IMPORTANT, LABEL_INBOX, LABEL_STARRED, LABEL_UNREAD, LabelMutation,
};
use crate::provider::MailProvider;

/// System labels that `MoveToLabel` must not create or target.
const RESERVED_LABELS: [&str; 3] = ["starred", "important", "trash"];

/// What `apply_actions` did for one message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// The trash call succeeded.
    pub trashed: bool,
    /// Staged label changes (sent only if non-empty).
    pub mutation: LabelMutation,
    /// The combined modify call was sent and succeeded.
    pub labels_applied: bool,
    /// Actions (or the final modify call) that failed.
    pub failures: usize,
}

/// Whether `name` is a system label, ignoring case and surrounding spaces.
pub fn is_reserved_label(name: &str) -> bool {
    RESERVED_LABELS
        .iter()
        .any(|reserved| name.trim().eq_ignore_ascii_case(reserved))
}

/// Apply `actions` to `message_id`, in order.
pub async fn apply_actions(
    provider: &dyn MailProvider,
    message_id: &str,
    actions: &[ActionSpec],
) -> ActionOutcome {
    let mut outcome = ActionOutcome::default();

    for action in actions {
        if let Err(e) = stage_action(provider, message_id, action, &mut outcome).await {
            warn!("Failed action '{action}' on message {message_id}: {e}");
            outcome.failures += 1;
        }
    }

    if !outcome.mutation.is_empty() {
        match provider.modify_labels(message_id, &outcome.mutation).await {
            Ok(()) => {
                debug!(
                    message_id,
                    add = ?outcome.mutation.add_labels,
                    remove = ?outcome.mutation.remove_labels,
                    "Labels updated"
                );
                outcome.labels_applied = true;
            }
            Err(e) => {
                warn!(
                    "Failed to update labels on message {message_id}: {}",
                    ActionError::Modify(e)
                );
                outcome.failures += 1;
            }
        }
    }

    outcome
}

async fn stage_action(
    provider: &dyn MailProvider,
    message_id: &str,
    action: &ActionSpec,
    outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
    match action {
        ActionSpec::MarkRead => outcome.mutation.remove(LABEL_UNREAD),
        ActionSpec::MarkUnread => outcome.mutation.add(LABEL_UNREAD),
        ActionSpec::Star => outcome.mutation.add(LABEL_STARRED),
        ActionSpec::MarkImportant => outcome.mutation.add(LABEL_IMPORTANT),
        ActionSpec::Trash => {
            provider
                .trash(message_id)
                .await
                .map_err(ActionError::Trash)?;
            debug!(message_id, "Moved to trash");
            outcome.trashed = true;
        }
        ActionSpec::MoveToLabel(name) if is_reserved_label(name) => {
            debug!(message_id, label = %name, "Skipping reserved label");
        }
        ActionSpec::MoveToLabel(name) => {
            let label_id = get_or_create_label(provider, name)
                .await
                .map_err(|source| ActionError::LabelResolution {
                    label: name.clone(),
                    source,
                })?;
            outcome.mutation.add(label_id);
            outcome.mutation.remove(LABEL_INBOX);
        }
    }
    Ok(())
}

/// Id of the label named `name` (case-insensitive), creating it if missing.
pub async fn get_or_create_label(
    provider: &dyn MailProvider,
    name: &str,
) -> Result<String, ProviderError> {
    let wanted = name.to_lowercase();
    let labels = provider.list_labels().await?;
    if let Some(existing) = labels.into_iter().find(|l| l.name.to_lowercase() == wanted) {
        return Ok(existing.id);
    }

    let created = provider.create_label(name).await?;
    debug!(label = %name, id = %created.id, "Created label");
    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::provider::memory::ProviderCall;
    use crate::provider::{InMemoryProvider, ProviderMessage};

    fn provider_with(id: &str) -> InMemoryProvider {
        let provider = InMemoryProvider::new();
        provider.add_message(ProviderMessage {
            id: id.into(),
            ..Default::default()
        });
        provider
    }

    fn set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    fn modify_calls(provider: &InMemoryProvider) -> Vec<ProviderCall> {
        provider
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ProviderCall::ModifyLabels { .. }))
            .collect()
    }

    #[tokio::test]
    async fn trash_issues_no_modify() {
        let provider = provider_with("m1");
        let outcome = apply_actions(&provider, "m1", &[ActionSpec::Trash]).await;

        assert!(outcome.trashed);
        assert!(!outcome.labels_applied);
        assert_eq!(provider.calls(), vec![ProviderCall::Trash("m1".into())]);
    }

    #[tokio::test]
    async fn move_to_new_label_creates_once_then_modifies_once() {
        let provider = provider_with("m1");
        let outcome =
            apply_actions(&provider, "m1", &[ActionSpec::MoveToLabel("Work".into())]).await;

        let calls = provider.calls();
        let created: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, ProviderCall::CreateLabel(_)))
            .collect();
        assert_eq!(created, vec![&ProviderCall::CreateLabel("Work".into())]);

        let label_id = provider.labels()[0].id.clone();
        assert_eq!(
            modify_calls(&provider),
            vec![ProviderCall::ModifyLabels {
                id: "m1".into(),
                add: set(&[label_id.as_str()]),
                remove: set(&["INBOX"]),
            }]
        );
        assert!(outcome.labels_applied);
        assert!(!provider.labels_of("m1").contains("INBOX"));
    }

    #[tokio::test]
    async fn existing_label_matched_case_insensitively() {
        let provider = provider_with("m1");
        let existing = provider.add_label("Receipts");
        apply_actions(&provider, "m1", &[ActionSpec::MoveToLabel("receipts".into())]).await;

        assert!(
            !provider
                .calls()
                .iter()
                .any(|c| matches!(c, ProviderCall::CreateLabel(_)))
        );
        assert!(provider.labels_of("m1").contains(&existing.id));
    }

    #[tokio::test]
    async fn label_actions_combine_into_one_modify() {
        let provider = provider_with("m1");
        apply_actions(
            &provider,
            "m1",
            &[ActionSpec::MarkRead, ActionSpec::Star, ActionSpec::MarkImportant],
        )
        .await;

        assert_eq!(
            modify_calls(&provider),
            vec![ProviderCall::ModifyLabels {
                id: "m1".into(),
                add: set(&["IMPORTANT", "STARRED"]),
                remove: set(&["UNREAD"]),
            }]
        );
    }

    #[tokio::test]
    async fn reserved_label_names_are_noops() {
        let provider = provider_with("m1");
        let outcome = apply_actions(
            &provider,
            "m1",
            &[
                ActionSpec::MoveToLabel("Starred".into()),
                ActionSpec::MoveToLabel("TRASH".into()),
                ActionSpec::MoveToLabel("important".into()),
            ],
        )
        .await;

        assert!(provider.calls().is_empty());
        assert_eq!(outcome, ActionOutcome::default());
    }

    #[tokio::test]
    async fn failed_action_does_not_stop_siblings() {
        let provider = provider_with("m1");
        provider.fail_label_listing();
        let outcome = apply_actions(
            &provider,
            "m1",
            &[ActionSpec::MoveToLabel("Work".into()), ActionSpec::MarkRead],
        )
        .await;

        assert_eq!(outcome.failures, 1);
        assert_eq!(
            modify_calls(&provider),
            vec![ProviderCall::ModifyLabels {
                id: "m1".into(),
                add: set(&[]),
                remove: set(&["UNREAD"]),
            }]
        );
    }

    #[tokio::test]
    async fn trash_failure_still_applies_labels() {
        let provider = provider_with("m1");
        provider.fail_message("m1");
        let outcome =
            apply_actions(&provider, "m1", &[ActionSpec::Trash, ActionSpec::MarkRead]).await;

        assert!(!outcome.trashed);
        assert!(!outcome.labels_applied);
        // trash failed, then the combined modify failed too
        assert_eq!(outcome.failures, 2);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn read_then_unread_keeps_last() {
        let provider = provider_with("m1");
        let outcome =
            apply_actions(&provider, "m1", &[ActionSpec::MarkRead, ActionSpec::MarkUnread]).await;
        assert_eq!(outcome.mutation.add_labels, set(&["UNREAD"]));
        assert!(outcome.mutation.remove_labels.is_empty());
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved_label("Starred"));
        assert!(is_reserved_label(" trash "));
        assert!(!is_reserved_label("Work"));
    }
}
