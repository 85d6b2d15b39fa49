// src/sync.rs

use chrono::NaiveDate;
use reqwest::Client;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::client::{Dhis2Client, RetryPolicy};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::SyncEvents;
use crate::fetch::{FetchReport, Fetcher};
use crate::period::period_window;
use crate::post::{PostReport, Poster};

/// Summary of one completed run.
#[derive(Clone, Debug)]
pub struct SyncReport {
    pub periods: Vec<String>,
    pub org_units: usize,
    pub fetch: FetchReport,
    /// `None` when nothing was posted: empty fetch result or dry run.
    pub posted: Option<PostReport>,
    pub elapsed: Duration,
}

/// Runs fetch then post for one configuration.
pub struct Synchronizer {
    config: SyncConfig,
    fetcher: Fetcher,
    poster: Poster,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, events: Arc<dyn SyncEvents>) -> Result<Self, SyncError> {
        config.validate()?;
        let http = Client::builder().build()?;
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        };

        let source = Dhis2Client::new(http.clone(), &config.source, Some(config.fetch_timeout()))?;
        let target = Dhis2Client::new(http, &config.target, config.post_timeout())?;

        let fetcher = Fetcher::new(
            source,
            config.data_element_ids.clone(),
            config.fetch_batch_size,
            config.fetch_concurrency,
            retry,
            events.clone(),
        );
        let poster = Poster::new(target, config.post_batch_size, retry, events);

        Ok(Self {
            config,
            fetcher,
            poster,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run to completion.
    pub async fn run(&self, today: NaiveDate) -> Result<SyncReport, SyncError> {
        self.run_until(today, std::future::pending::<()>()).await
    }

    /// Run until done or until `shutdown` resolves. Batches already posted
    /// when the shutdown arrives stay on the target.
    pub async fn run_until<F>(&self, today: NaiveDate, shutdown: F) -> Result<SyncReport, SyncError>
    where
        F: Future<Output = ()>,
    {
        let mut progress = PostReport::default();
        let outcome = tokio::select! {
            r = self.run_inner(today, &mut progress) => Some(r),
            _ = shutdown => None,
        };

        match outcome {
            Some(r) => r,
            None => {
                warn!(
                    committed_batches = progress.batches,
                    committed_records = progress.records,
                    "operation cancelled by user"
                );
                Err(SyncError::Cancelled)
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(today = %today))]
    async fn run_inner(&self, today: NaiveDate, progress: &mut PostReport) -> Result<SyncReport, SyncError> {
        let start = Instant::now();

        // ─── 1) periods ──────────────────────────────────────────────────
        let periods = period_window(today, self.config.year_offset)?.to_strings();
        info!(?periods, "periods included in query");

        // ─── 2) org units ────────────────────────────────────────────────
        let org_units = self.config.org_units.combined();
        info!(
            health_centers = self.config.org_units.health_centers.len(),
            hospitals = self.config.org_units.hospitals.len(),
            "{} org units to fetch",
            org_units.len()
        );

        // ─── 3) fetch ────────────────────────────────────────────────────
        let (table, fetch) = self.fetcher.fetch_all(&org_units, &periods).await;
        if fetch.auth_failures() > 0 {
            warn!(
                chunks = fetch.auth_failures(),
                "source rejected credentials for some batches"
            );
        }

        // ─── 4) post ─────────────────────────────────────────────────────
        let posted = if table.is_empty() {
            info!("no data values found; skipping post");
            None
        } else if self.config.dry_run {
            info!(records = table.len(), "dry run; skipping post");
            None
        } else {
            self.poster.post_all_with_report(&table, progress).await?;
            Some(progress.clone())
        };

        let elapsed = start.elapsed();
        info!(
            fetched = fetch.records,
            posted = posted.as_ref().map(|p| p.records).unwrap_or(0),
            rejected_batches = posted.as_ref().map(|p| p.rejected_batches).unwrap_or(0),
            elapsed = ?elapsed,
            "sync finished"
        );

        Ok(SyncReport {
            periods,
            org_units: org_units.len(),
            fetch,
            posted,
            elapsed,
        })
    }
}
