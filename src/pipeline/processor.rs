//! Rule processor: evaluate every stored record and apply the first
//! matching rule set's actions.
//!
//! Flow per record:
//! 1. Rule sets in configured order, first match wins
//! 2. Matched actions reconciled against the provider
//!
//! The store is only read here. Action failures are counted and logged by
//! the action layer and never stop the loop.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::error::Error;
use crate::pipeline::actions::apply_actions;
use crate::pipeline::rules::{RuleSet, RulesEngine, now_at_record_offset};
use crate::provider::MailProvider;
use crate::store::MessageStore;

/// Totals for one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Records read from the store.
    pub records: usize,
    /// Records that matched some rule set.
    pub matched: usize,
    /// Failed actions across all records.
    pub failures: usize,
}

/// Applies the first matching rule set to each stored record.
pub struct RuleProcessor {
    rules: RulesEngine,
    provider: Arc<dyn MailProvider>,
    store: Arc<MessageStore>,
    now: Option<NaiveDateTime>,
}

impl RuleProcessor {
    /// Rule sets are evaluated in the given order.
    pub fn new(
        rule_sets: Vec<RuleSet>,
        provider: Arc<dyn MailProvider>,
        store: Arc<MessageStore>,
    ) -> Self {
        Self {
            rules: RulesEngine::new(rule_sets),
            provider,
            store,
            now: None,
        }
    }

    /// Pin the reference time used by age predicates.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    /// Evaluate every stored record once. Only a store read failure is fatal.
    pub async fn run(&self) -> Result<ProcessReport, Error> {
        let records = self.store.all().await?;
        let now = self.now.unwrap_or_else(now_at_record_offset);

        let mut report = ProcessReport {
            records: records.len(),
            ..Default::default()
        };
        if self.rules.is_empty() {
            info!("No rule sets configured; nothing to do");
            return Ok(report);
        }

        info!(
            records = records.len(),
            rule_sets = self.rules.rule_sets().len(),
            "Processing stored emails"
        );

        for record in &records {
            let Some((index, rule_set)) = self.rules.first_match(record, now) else {
                debug!(id = %record.id, "No rule set matched");
                continue;
            };

            info!(
                id = %record.id,
                subject = %record.subject,
                "Matched {}",
                rule_set.display_name(index)
            );
            report.matched += 1;

            let outcome = apply_actions(self.provider.as_ref(), &record.id, &rule_set.actions).await;
            report.failures += outcome.failures;
        }

        info!(
            matched = report.matched,
            failures = report.failures,
            "Finished processing emails"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::pipeline::loader::load_rules;
    use crate::pipeline::rules::{ActionSpec, Aggregator, Condition};
    use crate::pipeline::types::{EmailRecord, Field};
    use crate::provider::memory::ProviderCall;
    use crate::provider::{InMemoryProvider, ProviderMessage};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn record(id: &str, sender: &str, received_at: &str) -> EmailRecord {
        EmailRecord {
            id: id.into(),
            sender: sender.into(),
            subject: format!("subject {id}"),
            received_at: received_at.into(),
            ..Default::default()
        }
    }

    fn rule_set(conditions: Vec<Condition>, actions: Vec<ActionSpec>) -> RuleSet {
        RuleSet {
            conditions,
            actions,
            ..Default::default()
        }
    }

    async fn setup(records: &[EmailRecord]) -> (Arc<InMemoryProvider>, Arc<MessageStore>) {
        let provider = Arc::new(InMemoryProvider::new());
        let store = Arc::new(MessageStore::open_in_memory("Emails").await.unwrap());
        for r in records {
            provider.add_message(ProviderMessage {
                id: r.id.clone(),
                ..Default::default()
            });
            store.upsert(r).await.unwrap();
        }
        (provider, store)
    }

    #[tokio::test]
    async fn first_match_short_circuits() {
        let (provider, store) = setup(&[record("m1", "boss@work.com", "")]).await;
        let rules = vec![
            rule_set(
                vec![Condition::new(Field::Sender, "contains", "work.com")],
                vec![ActionSpec::MarkRead],
            ),
            rule_set(
                vec![Condition::new(Field::Sender, "contains", "boss")],
                vec![ActionSpec::Trash],
            ),
        ];

        let report = RuleProcessor::new(rules, provider.clone(), store)
            .with_now(now())
            .run()
            .await
            .unwrap();

        assert_eq!(report.matched, 1);
        assert!(
            !provider
                .calls()
                .iter()
                .any(|c| matches!(c, ProviderCall::Trash(_)))
        );
        assert!(!provider.labels_of("m1").contains("UNREAD"));
    }

    #[tokio::test]
    async fn unmatched_records_are_untouched() {
        let (provider, store) = setup(&[
            record("m1", "news@letters.com", "30/06/2024 09:00:00"),
            record("m2", "friend@home.com", "01/01/2024 09:00:00"),
        ])
        .await;
        let rules = vec![RuleSet {
            name: Some("Recent newsletters".into()),
            aggregator: Aggregator::All,
            conditions: vec![
                Condition::new(Field::Sender, "contains", "letters"),
                Condition::new(Field::ReceivedAt, "less_than", "2_days"),
            ],
            actions: vec![ActionSpec::Star],
        }];

        let report = RuleProcessor::new(rules, provider.clone(), store)
            .with_now(now())
            .run()
            .await
            .unwrap();

        assert_eq!(
            report,
            ProcessReport {
                records: 2,
                matched: 1,
                failures: 0
            }
        );
        assert!(provider.labels_of("m1").contains("STARRED"));
        assert!(!provider.labels_of("m2").contains("STARRED"));
    }

    #[tokio::test]
    async fn action_failures_do_not_stop_other_records() {
        let (provider, store) = setup(&[
            record("bad", "x@spam.com", ""),
            record("good", "y@spam.com", ""),
        ])
        .await;
        provider.fail_message("bad");
        let rules = vec![rule_set(
            vec![Condition::new(Field::Sender, "contains", "spam")],
            vec![ActionSpec::Trash],
        )];

        let report = RuleProcessor::new(rules, provider.clone(), store)
            .with_now(now())
            .run()
            .await
            .unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.failures, 1);
        assert!(provider.labels_of("good").contains("TRASH"));
    }

    #[tokio::test]
    async fn no_rules_makes_no_calls() {
        let (provider, store) = setup(&[record("m1", "a@b.com", "")]).await;
        let report = RuleProcessor::new(vec![], provider.clone(), store)
            .run()
            .await
            .unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.matched, 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn loaded_rule_document_drives_actions() {
        let dir = tempfile::tempdir().unwrap();
        let rules_file = dir.path().join("rules.json");
        std::fs::write(
            &rules_file,
            r#"{"all_rules": [{"predicate": "any",
                "rules": [{"field": "from", "predicate": "equals", "value": "A@B.COM "}],
                "actions": ["mark_as_read"]}]}"#,
        )
        .unwrap();
        let rule_sets = load_rules(&rules_file).await.unwrap();

        let (provider, store) = setup(&[record("m1", "a@b.com", "")]).await;
        let report = RuleProcessor::new(rule_sets, provider.clone(), store)
            .run()
            .await
            .unwrap();

        assert_eq!(report.matched, 1);
        assert!(!provider.labels_of("m1").contains("UNREAD"));
    }
}
