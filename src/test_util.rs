// src/test_util.rs

use std::sync::Mutex;
use wiremock::MockServer;

use crate::config::Endpoint;
use crate::error::ErrorKind;
use crate::events::{Stage, SyncEvents};
use crate::model::ImportSummary;

/// Records every event so tests can assert on them.
#[derive(Default)]
pub(crate) struct Recorder {
    pub fetched: Mutex<Vec<(usize, usize)>>,
    pub posted: Mutex<Vec<(usize, usize)>>,
    pub errors: Mutex<Vec<(Stage, usize, ErrorKind)>>,
    /// Detail text of each error, in the same order as `errors`.
    pub details: Mutex<Vec<String>>,
    /// Import status reported for each posted batch, if any.
    pub statuses: Mutex<Vec<Option<String>>>,
}

impl SyncEvents for Recorder {
    fn on_chunk_fetched(&self, index: usize, count: usize) {
        self.fetched.lock().unwrap().push((index, count));
    }

    fn on_chunk_posted(&self, index: usize, count: usize, summary: Option<&ImportSummary>) {
        self.posted.lock().unwrap().push((index, count));
        self.statuses
            .lock()
            .unwrap()
            .push(summary.and_then(|s| s.status.clone()));
    }

    fn on_error(&self, stage: Stage, index: usize, kind: ErrorKind, detail: &str) {
        self.errors.lock().unwrap().push((stage, index, kind));
        self.details.lock().unwrap().push(detail.to_string());
    }
}

/// Endpoint pointing at a mock server with throwaway credentials.
pub(crate) fn endpoint(server: &MockServer) -> Endpoint {
    Endpoint {
        base_url: server.uri(),
        username: "admin".into(),
        password: "district".into(),
    }
}
