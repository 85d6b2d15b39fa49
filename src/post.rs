// src/post.rs

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::client::{with_retry, Dhis2Client, RetryPolicy};
use crate::error::SyncError;
use crate::events::{Stage, SyncEvents};
use crate::model::{DataPointTable, DataValueSetRef, ImportCount};

/// What made it to the target before the stage finished.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostReport {
    pub batches: usize,
    pub records: usize,
    /// Sum of the import counts the target reported, where it reported any.
    pub imported: ImportCount,
    /// Batches the target answered with 2xx but whose import summary
    /// reported errors or ignored every value.
    pub rejected_batches: usize,
}

/// Writes a table to the target in bounded batches.
pub struct Poster {
    client: Dhis2Client,
    batch_size: usize,
    retry: RetryPolicy,
    events: Arc<dyn SyncEvents>,
}

impl Poster {
    pub fn new(client: Dhis2Client, batch_size: usize, retry: RetryPolicy, events: Arc<dyn SyncEvents>) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            retry,
            events,
        }
    }

    /// Post every batch of `table` in order.
    ///
    /// The first failing batch ends the stage. Batches already accepted by the
    /// target stay there; the returned error says nothing about them, so
    /// callers that need the partial count should use `post_all_with_report`.
    pub async fn post_all(&self, table: &DataPointTable) -> Result<PostReport, SyncError> {
        let mut report = PostReport::default();
        self.post_all_with_report(table, &mut report).await?;
        Ok(report)
    }

    /// Like `post_all`, but progress is written into `report` as it happens
    /// so it survives a failure or cancellation.
    #[instrument(level = "info", skip_all, fields(records = table.len(), batch_size = self.batch_size))]
    pub async fn post_all_with_report(&self, table: &DataPointTable, report: &mut PostReport) -> Result<(), SyncError> {
        for (i, batch) in table.chunks(self.batch_size).enumerate() {
            let index = i + 1;
            let payload = DataValueSetRef {
                data_values: batch.iter().collect(),
            };

            let result = match serde_json::to_vec(&payload) {
                Ok(body) => {
                    with_retry(self.retry, "post", || self.client.post_data_values(body.clone())).await
                }
                Err(e) => Err(SyncError::from(e)),
            };

            match result {
                Ok(summary) => {
                    report.batches += 1;
                    report.records += batch.len();
                    if let Some(c) = summary.as_ref().and_then(|s| s.import_count.as_ref()) {
                        report.imported.imported += c.imported;
                        report.imported.updated += c.updated;
                        report.imported.ignored += c.ignored;
                        report.imported.deleted += c.deleted;
                    }
                    if let Some(s) = summary.as_ref().filter(|s| !s.is_clean()) {
                        report.rejected_batches += 1;
                        let c = s.import_count.clone().unwrap_or_default();
                        warn!(
                            chunk = index,
                            status = s.status.as_deref().unwrap_or("-"),
                            imported = c.imported,
                            updated = c.updated,
                            ignored = c.ignored,
                            "target reported a problem importing batch"
                        );
                    }
                    self.events.on_chunk_posted(index, batch.len(), summary.as_ref());
                }
                Err(e) => {
                    self.events.on_error(Stage::Post, index, e.kind(), &e.to_string());
                    error!(
                        chunk = index,
                        committed_batches = report.batches,
                        committed_records = report.records,
                        "post stage aborted: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        info!(
            batches = report.batches,
            records = report.records,
            rejected_batches = report.rejected_batches,
            "post stage done"
        );
        Ok(())
    }
}
