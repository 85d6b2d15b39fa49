use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use dhis2_sync::{LogEvents, SyncConfig, SyncError, Synchronizer};
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Copy the last six months of aggregate data values from one DHIS2
/// instance into another.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// YAML config with endpoints, data elements and org units
    #[arg(long, default_value = "dhis2-sync.yaml")]
    config: PathBuf,

    /// Override `year_offset` from the config
    #[arg(long)]
    year_offset: Option<u32>,

    /// Fetch and report, but do not post
    #[arg(long)]
    dry_run: bool,

    /// Anchor date (YYYY-MM-DD) instead of today
    #[arg(long)]
    today: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dhis2_sync=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();
    info!("DHIS2 data value sets sync");

    // ─── 2) config ───────────────────────────────────────────────────
    let args = Args::parse();
    let mut config = SyncConfig::load(&args.config)?;
    if let Some(offset) = args.year_offset {
        config.year_offset = offset;
    }
    config.dry_run |= args.dry_run;
    info!(
        source = %config.source.base_url,
        target = %config.target.base_url,
        data_elements = config.data_element_ids.len(),
        dry_run = config.dry_run,
        "configuration loaded"
    );

    // ─── 3) run ──────────────────────────────────────────────────────
    let sync = Synchronizer::new(config, Arc::new(LogEvents)).context("building synchronizer")?;
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match sync.run_until(today, shutdown).await {
        Ok(report) => {
            info!(
                fetched = report.fetch.records,
                failed_batches = report.fetch.failed.len(),
                posted = report.posted.map(|p| p.records).unwrap_or(0),
                elapsed = ?report.elapsed,
                "all done"
            );
            Ok(())
        }
        Err(SyncError::Cancelled) => Ok(()),
        Err(e) => {
            error!("fatal error: {}", e);
            Err(e.into())
        }
    }
}
