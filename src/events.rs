// src/events.rs

use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::model::ImportSummary;

/// Which side of the pipeline an event comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Post,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Post => "post",
        }
    }
}

/// Progress sink for a sync run. Chunk indexes are 1-based.
pub trait SyncEvents: Send + Sync {
    fn on_chunk_fetched(&self, index: usize, count: usize);

    fn on_chunk_posted(&self, index: usize, count: usize, summary: Option<&ImportSummary>);

    fn on_error(&self, stage: Stage, index: usize, kind: ErrorKind, detail: &str);
}

/// Default sink: writes every event to the `tracing` log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEvents;

impl SyncEvents for LogEvents {
    fn on_chunk_fetched(&self, index: usize, count: usize) {
        info!(chunk = index, records = count, "retrieved batch from source");
    }

    fn on_chunk_posted(&self, index: usize, count: usize, summary: Option<&ImportSummary>) {
        match summary.and_then(|s| s.import_count.as_ref().map(|c| (s, c))) {
            Some((s, c)) => info!(
                chunk = index,
                records = count,
                status = s.status.as_deref().unwrap_or("-"),
                imported = c.imported,
                updated = c.updated,
                ignored = c.ignored,
                "posted batch to target"
            ),
            None => info!(chunk = index, records = count, "posted batch to target"),
        }
    }

    fn on_error(&self, stage: Stage, index: usize, kind: ErrorKind, detail: &str) {
        warn!(stage = stage.as_str(), chunk = index, kind = %kind, "{}", detail);
    }
}
