// src/client.rs

use reqwest::{header::CONTENT_TYPE, Client};
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::Endpoint;
use crate::error::{snippet, SyncError};
use crate::model::{DataValueSet, ImportSummary};

/// Characters of an undecodable body kept for diagnostics.
const DECODE_SNIPPET_LEN: usize = 500;

/// Bounded fixed-delay retry for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Ok(t) => return Ok(t),
            Err(e) if e.is_transient() && attempts < policy.max_retries => {
                attempts += 1;
                warn!(what, attempt = attempts, delay_ms = policy.delay.as_millis() as u64, error = %e, "retrying");
                sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Thin wrapper over one DHIS2 instance's `dataValueSets` endpoint.
#[derive(Clone, Debug)]
pub struct Dhis2Client {
    http: Client,
    url: Url,
    endpoint: Endpoint,
    timeout: Option<Duration>,
}

impl Dhis2Client {
    pub fn new(http: Client, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<Self, SyncError> {
        Ok(Self {
            http,
            url: endpoint.data_value_sets_url()?,
            endpoint: endpoint.clone(),
            timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `GET dataValueSets` with the given query pairs.
    pub async fn get_data_values(&self, query: &[(&str, &str)]) -> Result<DataValueSet, SyncError> {
        let mut req = self
            .http
            .get(self.url.clone())
            .query(query)
            .basic_auth(&self.endpoint.username, Some(&self.endpoint.password));
        if let Some(t) = self.timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(%status, bytes = body.len(), "GET {}", self.url);

        if !status.is_success() {
            return Err(SyncError::from_status(status, &body));
        }
        serde_json::from_str(&body).map_err(|_| SyncError::Decode {
            snippet: snippet(&body, DECODE_SNIPPET_LEN),
        })
    }

    /// `POST dataValueSets` with an already-serialized JSON body. Returns the
    /// import summary when the server sends one.
    pub async fn post_data_values(&self, body: Vec<u8>) -> Result<Option<ImportSummary>, SyncError> {
        let mut req = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.endpoint.username, Some(&self.endpoint.password))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(t) = self.timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(%status, bytes = text.len(), "POST {}", self.url);

        if !status.is_success() {
            return Err(SyncError::from_status(status, &text));
        }
        Ok(ImportSummary::parse(&text))
    }
}
