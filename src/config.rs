// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};
use url::Url;

use crate::error::SyncError;
use crate::period::MAX_YEAR_OFFSET;

pub const SOURCE_PASSWORD_ENV: &str = "DHIS2_SOURCE_PASSWORD";
pub const TARGET_PASSWORD_ENV: &str = "DHIS2_TARGET_PASSWORD";

/// Base URL plus basic-auth credentials of one DHIS2 instance.
#[derive(Clone, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Endpoint {
    /// `{base_url}/api/dataValueSets`, tolerant of a trailing slash on the base.
    pub fn data_value_sets_url(&self) -> Result<Url, SyncError> {
        let mut base = self.base_url.trim_end_matches('/').to_string();
        base.push('/');
        Url::parse(&base)
            .and_then(|b| b.join("api/dataValueSets"))
            .map_err(|e| SyncError::Config(format!("bad base_url {:?}: {}", self.base_url, e)))
    }
}

/// Org units to sync, kept in their two source groupings.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrgUnits {
    #[serde(default)]
    pub health_centers: Vec<String>,
    #[serde(default)]
    pub hospitals: Vec<String>,
}

impl OrgUnits {
    /// Health centres followed by hospitals.
    pub fn combined(&self) -> Vec<String> {
        self.health_centers
            .iter()
            .chain(self.hospitals.iter())
            .cloned()
            .collect()
    }
}

/// Everything a run needs, passed explicitly into each stage.
#[derive(Clone, Debug, Deserialize)]
pub struct SyncConfig {
    pub source: Endpoint,
    pub target: Endpoint,
    pub data_element_ids: Vec<String>,
    pub org_units: OrgUnits,

    /// Org units per read call.
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
    /// Data values per write call.
    #[serde(default = "default_post_batch_size")]
    pub post_batch_size: usize,
    /// Read calls allowed in flight at once.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_year_offset")]
    pub year_offset: u32,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Unset means the transport default.
    #[serde(default)]
    pub post_timeout_secs: Option<u64>,

    #[serde(default)]
    pub dry_run: bool,
}

fn default_fetch_batch_size() -> usize {
    10
}
fn default_post_batch_size() -> usize {
    1000
}
fn default_fetch_concurrency() -> usize {
    1
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_year_offset() -> u32 {
    8
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

impl SyncConfig {
    /// Load from a YAML file, apply password overrides from the environment,
    /// then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg = Self::from_yaml(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(pw) = env::var(SOURCE_PASSWORD_ENV) {
            self.source.password = pw;
        }
        if let Ok(pw) = env::var(TARGET_PASSWORD_ENV) {
            self.target.password = pw;
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let positive = [
            ("fetch_batch_size", self.fetch_batch_size),
            ("post_batch_size", self.post_batch_size),
            ("fetch_concurrency", self.fetch_concurrency),
        ];
        for (name, v) in positive {
            if v == 0 {
                return Err(SyncError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.year_offset > MAX_YEAR_OFFSET {
            return Err(SyncError::Config(format!(
                "year_offset must be at most {}",
                MAX_YEAR_OFFSET
            )));
        }
        if self.data_element_ids.is_empty() {
            return Err(SyncError::Config("data_element_ids is empty".into()));
        }
        if self.org_units.health_centers.is_empty() && self.org_units.hospitals.is_empty() {
            return Err(SyncError::Config("no org units configured".into()));
        }
        self.source.data_value_sets_url()?;
        self.target.data_value_sets_url()?;
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn post_timeout(&self) -> Option<Duration> {
        self.post_timeout_secs.map(Duration::from_secs)
    }
}
