// src/fetch.rs

use futures::{stream, StreamExt};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::client::{with_retry, Dhis2Client, RetryPolicy};
use crate::error::{ErrorKind, SyncError};
use crate::events::{Stage, SyncEvents};
use crate::model::{DataPointTable, DataValueSet};

/// Outcome of the fetch stage, alongside the table itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub chunks: usize,
    pub records: usize,
    /// 1-based chunk index and failure kind for every skipped chunk.
    pub failed: Vec<(usize, ErrorKind)>,
}

impl FetchReport {
    pub fn auth_failures(&self) -> usize {
        self.failed
            .iter()
            .filter(|(_, k)| *k == ErrorKind::Auth)
            .count()
    }
}

/// Reads data values from the source, one call per org-unit chunk.
pub struct Fetcher {
    client: Dhis2Client,
    data_element_ids: Vec<String>,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
    events: Arc<dyn SyncEvents>,
}

impl Fetcher {
    pub fn new(
        client: Dhis2Client,
        data_element_ids: Vec<String>,
        batch_size: usize,
        concurrency: usize,
        retry: RetryPolicy,
        events: Arc<dyn SyncEvents>,
    ) -> Self {
        Self {
            client,
            data_element_ids,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            retry,
            events,
        }
    }

    /// Fetch every chunk of `org_units` for `periods`.
    ///
    /// Failed chunks are reported and contribute nothing; the remaining chunks
    /// still run. Records land in the table in chunk order, even when several
    /// chunks are in flight.
    #[instrument(level = "info", skip_all, fields(org_units = org_units.len(), periods = periods.len()))]
    pub async fn fetch_all(&self, org_units: &[String], periods: &[String]) -> (DataPointTable, FetchReport) {
        let mut table = DataPointTable::new();
        let mut report = FetchReport::default();

        let mut results = stream::iter(org_units.chunks(self.batch_size).enumerate())
            .map(|(i, ous)| async move {
                let index = i + 1;
                info!(chunk = index, org_units = ous.len(), "fetching batch");
                (index, self.fetch_chunk(ous, periods).await)
            })
            .buffered(self.concurrency);

        while let Some((index, result)) = results.next().await {
            report.chunks += 1;
            match result {
                Ok(set) => {
                    let count = set.data_values.len();
                    table.extend(set.data_values);
                    report.records += count;
                    self.events.on_chunk_fetched(index, count);
                }
                Err(e) => {
                    report.failed.push((index, e.kind()));
                    self.events.on_error(Stage::Fetch, index, e.kind(), &e.to_string());
                }
            }
        }

        info!(
            chunks = report.chunks,
            failed = report.failed.len(),
            records = report.records,
            "fetch stage done"
        );
        (table, report)
    }

    async fn fetch_chunk(&self, org_units: &[String], periods: &[String]) -> Result<DataValueSet, SyncError> {
        let mut query: Vec<(&str, &str)> = vec![("paging", "false"), ("includeDeleted", "false")];
        query.extend(org_units.iter().map(|ou| ("orgUnit", ou.as_str())));
        query.extend(periods.iter().map(|pe| ("period", pe.as_str())));
        query.extend(self.data_element_ids.iter().map(|de| ("dataElement", de.as_str())));

        with_retry(self.retry, "fetch", || self.client.get_data_values(&query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{endpoint, Recorder};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn ou_ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("OU{:09}", i)).collect()
    }

    fn periods() -> Vec<String> {
        vec!["202307".into(), "202308".into()]
    }

    /// Answers each GET with one data value per requested org unit.
    fn echo_org_units(req: &Request) -> ResponseTemplate {
        let values: Vec<_> = req
            .url
            .query_pairs()
            .filter(|(k, _)| k == "orgUnit")
            .map(|(_, ou)| {
                json!({
                    "dataElement": "hJGEI95aFvT",
                    "period": "202307",
                    "orgUnit": ou,
                    "categoryOptionCombo": "HllvX50cXC0",
                    "value": "1"
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "dataValues": values }))
    }

    fn fetcher(server: &MockServer, batch: usize, concurrency: usize, rec: Arc<Recorder>) -> Fetcher {
        let client = Dhis2Client::new(
            reqwest::Client::new(),
            &endpoint(server),
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        Fetcher::new(
            client,
            vec!["hJGEI95aFvT".into(), "NTidDdqjEde".into()],
            batch,
            concurrency,
            RetryPolicy::none(),
            rec,
        )
    }

    #[tokio::test]
    async fn test_one_call_per_chunk_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dataValueSets"))
            .and(query_param("paging", "false"))
            .and(query_param("includeDeleted", "false"))
            .respond_with(echo_org_units)
            .expect(5)
            .mount(&server)
            .await;

        let rec = Arc::new(Recorder::default());
        let ous = ou_ids(46);
        let (table, report) = fetcher(&server, 10, 1, rec.clone())
            .fetch_all(&ous, &periods())
            .await;

        assert_eq!(report.chunks, 5);
        assert!(report.failed.is_empty());
        assert_eq!(table.len(), 46);
        let got: Vec<&str> = table.iter().map(|p| p.org_unit.as_str()).collect();
        assert_eq!(got, ous.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(
            *rec.fetched.lock().unwrap(),
            vec![(1, 10), (2, 10), (3, 10), (4, 10), (5, 6)]
        );
    }

    #[tokio::test]
    async fn test_query_carries_every_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "dataValues": [] })))
            .mount(&server)
            .await;

        let rec = Arc::new(Recorder::default());
        fetcher(&server, 3, 1, rec)
            .fetch_all(&ou_ids(3), &periods())
            .await;

        let reqs = server.received_requests().await.unwrap();
        assert_eq!(reqs.len(), 1);
        let pairs: Vec<(String, String)> = reqs[0].url.query_pairs().into_owned().collect();
        let count = |k: &str| pairs.iter().filter(|(key, _)| key == k).count();
        assert_eq!(count("orgUnit"), 3);
        assert_eq!(count("period"), 2);
        assert_eq!(count("dataElement"), 2);
        assert!(reqs[0].headers.get("authorization").is_some());
    }

    #[tokio::test]
    async fn test_ordered_under_concurrency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(echo_org_units)
            .expect(7)
            .mount(&server)
            .await;

        let rec = Arc::new(Recorder::default());
        let ous = ou_ids(20);
        let (table, _) = fetcher(&server, 3, 4, rec.clone())
            .fetch_all(&ous, &periods())
            .await;

        let got: Vec<String> = table.iter().map(|p| p.org_unit.clone()).collect();
        assert_eq!(got, ous);
        let indexes: Vec<usize> = rec.fetched.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_server_error_chunk_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("orgUnit", "OU000000002"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(echo_org_units)
            .mount(&server)
            .await;

        let rec = Arc::new(Recorder::default());
        let (table, report) = fetcher(&server, 2, 1, rec.clone())
            .fetch_all(&ou_ids(6), &periods())
            .await;

        // chunk 2 holds OU..2 and OU..3
        assert_eq!(table.len(), 4);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.failed, vec![(2, ErrorKind::HttpStatus)]);
        assert_eq!(*rec.fetched.lock().unwrap(), vec![(1, 2), (3, 2)]);
    }

    #[tokio::test]
    async fn test_forbidden_chunk_recorded_as_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("orgUnit", "OU000000000"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(echo_org_units)
            .mount(&server)
            .await;

        let rec = Arc::new(Recorder::default());
        let (table, report) = fetcher(&server, 1, 1, rec.clone())
            .fetch_all(&ou_ids(3), &periods())
            .await;

        assert_eq!(table.len(), 2);
        assert_eq!(report.auth_failures(), 1);
        assert_eq!(
            *rec.errors.lock().unwrap(),
            vec![(Stage::Fetch, 1, ErrorKind::Auth)]
        );
    }

    #[tokio::test]
    async fn test_non_json_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let rec = Arc::new(Recorder::default());
        let (table, report) = fetcher(&server, 10, 1, rec.clone())
            .fetch_all(&ou_ids(4), &periods())
            .await;

        assert!(table.is_empty());
        assert_eq!(report.failed, vec![(1, ErrorKind::Decode)]);
        let details = rec.details.lock().unwrap();
        assert_eq!(details.len(), 1);
        assert!(details[0].contains("<html>login</html>"), "detail was {:?}", details[0]);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(echo_org_units)
            .expect(1)
            .mount(&server)
            .await;

        let client = Dhis2Client::new(reqwest::Client::new(), &endpoint(&server), None).unwrap();
        let rec = Arc::new(Recorder::default());
        let fetcher = Fetcher::new(
            client,
            vec!["hJGEI95aFvT".into()],
            10,
            1,
            RetryPolicy {
                max_retries: 2,
                delay: Duration::ZERO,
            },
            rec.clone(),
        );
        let (table, report) = fetcher.fetch_all(&ou_ids(2), &periods()).await;

        assert_eq!(table.len(), 2);
        assert!(report.failed.is_empty());
        assert!(rec.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_source_is_network_error() {
        // Nothing listens on the port once the listener is dropped.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let uri = format!("http://127.0.0.1:{}", port);
        let client = Dhis2Client::new(
            reqwest::Client::new(),
            &crate::config::Endpoint {
                base_url: uri,
                username: "u".into(),
                password: "p".into(),
            },
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let rec = Arc::new(Recorder::default());
        let fetcher = Fetcher::new(client, vec!["x".into()], 5, 1, RetryPolicy::none(), rec);
        let (table, report) = fetcher.fetch_all(&ou_ids(7), &periods()).await;

        assert!(table.is_empty());
        assert_eq!(report.chunks, 2);
        assert_eq!(
            report.failed,
            vec![(1, ErrorKind::Network), (2, ErrorKind::Network)]
        );
    }
}
