//! Ingestion pipeline: refresh the Message Store from the provider inbox.
//!
//! The store is a snapshot. Each run clears it, lists up to `batch_size`
//! ids and upserts one record per message. A message that fails to fetch or
//! persist is logged and skipped; listing or store setup failures end the run.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, ItemError};
use crate::pipeline::decode::to_record;
use crate::pipeline::types::EmailRecord;
use crate::provider::MailProvider;
use crate::store::MessageStore;

/// Totals for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Ids returned by the listing call.
    pub listed: usize,
    /// Records fetched and upserted.
    pub stored: usize,
    /// Messages that failed to fetch or persist.
    pub skipped: usize,
}

/// Replaces the store contents with the newest messages of one folder.
pub struct Ingestor {
    provider: Arc<dyn MailProvider>,
    store: Arc<MessageStore>,
    folder: String,
    batch_size: u32,
}

impl Ingestor {
    /// Takes the folder and batch size from `config`.
    pub fn new(config: &Config, provider: Arc<dyn MailProvider>, store: Arc<MessageStore>) -> Self {
        Self {
            provider,
            store,
            folder: config.inbox_folder.clone(),
            batch_size: config.batch_size,
        }
    }

    /// Run one snapshot refresh.
    pub async fn run(&self) -> Result<IngestReport, Error> {
        // Store failures abort before the provider is contacted.
        self.store.ensure_table().await?;
        self.store.clear().await?;

        let ids = self
            .provider
            .list_message_ids(&self.folder, self.batch_size)
            .await?;

        let total = ids.len();
        info!(folder = %self.folder, total, "Fetching messages");

        let mut report = IngestReport {
            listed: total,
            ..Default::default()
        };

        for (index, id) in ids.iter().enumerate() {
            match self.ingest_one(id).await {
                Ok(record) => {
                    report.stored += 1;
                    info!(
                        "[✓] Fetched and stored email {} of {} — Subject: \"{}\"",
                        index + 1,
                        total,
                        record.subject
                    );
                }
                Err(e) => {
                    warn!("Error fetching email {id}: {e}");
                    report.skipped += 1;
                }
            }
        }

        info!(
            stored = report.stored,
            skipped = report.skipped,
            "Finished fetching and storing emails"
        );
        Ok(report)
    }

    async fn ingest_one(&self, id: &str) -> Result<EmailRecord, ItemError> {
        let message = self.provider.get_message(id).await?;
        let record = to_record(&message);
        self.store.upsert(&record).await?;
        Ok(record)
    }
}
