// SPDX-License-Identifier: Apache-2.0

//! Grafana Loki push sink.
//!
//! Each event becomes a single-entry stream pushed to
//! `{target}/loki/api/v1/push`. Failed pushes are retried with a linear
//! backoff, and every push is bounded by the request timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, warn};

use crate::event::Event;
use crate::exporters::http_client::{HttpClient, build_hyper_client};
use crate::exporters::retry::RetryConfig;
use crate::exporters::{Sink, SinkError};

pub const PUSH_PATH: &str = "/loki/api/v1/push";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const ENV_LABEL_VAR: &str = "FLOX_ENV";

#[derive(Clone, Debug)]
pub struct LokiConfig {
    pub target: String,
    pub labels: BTreeMap<String, String>,
    pub retry: RetryConfig,
    pub timeout: Duration,
}

impl LokiConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            labels: BTreeMap::new(),
            retry: RetryConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct LokiSink {
    client: HttpClient,
    uri: Uri,
    labels: BTreeMap<String, String>,
    retry: RetryConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: [PushStream<'a>; 1],
}

#[derive(Serialize)]
struct PushStream<'a> {
    stream: &'a BTreeMap<String, String>,
    values: [[String; 2]; 1],
}

/// Stream labels for every push: `job=flox`, then the configured labels, then
/// `host` and `env` when not configured.
pub fn stream_labels(
    configured: &BTreeMap<String, String>,
    host: impl FnOnce() -> String,
    env: impl FnOnce() -> String,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([("job".to_string(), "flox".to_string())]);
    labels.extend(configured.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels.entry("host".to_string()).or_insert_with(host);
    labels.entry("env".to_string()).or_insert_with(env);
    labels
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn env_name() -> String {
    std::env::var(ENV_LABEL_VAR).unwrap_or_default()
}

impl LokiSink {
    pub fn new(config: LokiConfig, cancel: CancellationToken) -> Result<Self, BoxError> {
        let uri: Uri = format!("{}{}", config.target.trim_end_matches('/'), PUSH_PATH)
            .parse()
            .map_err(|e| format!("invalid loki target {}: {}", config.target, e))?;
        let labels = stream_labels(&config.labels, hostname, env_name);
        debug!(uri = %uri, labels = ?labels, "Configured Loki sink");

        Ok(Self {
            client: build_hyper_client()?,
            uri,
            labels,
            retry: config.retry,
            timeout: config.timeout,
            cancel,
        })
    }

    fn encode(&self, event: &Event) -> Result<Bytes, SinkError> {
        let line = event.to_json_line()?;
        let ts = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let req = PushRequest {
            streams: [PushStream {
                stream: &self.labels,
                values: [[ts.to_string(), line]],
            }],
        };
        Ok(Bytes::from(serde_json::to_vec(&req)?))
    }

    async fn push(&self, body: Bytes) -> Result<(), SinkError> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let exchange = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| SinkError::Request(e.to_string()))?;

            let status = resp.status();
            if status.as_u16() >= 300 {
                let body = match resp.into_body().collect().await {
                    Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
                    Err(_) => String::new(),
                };
                return Err(SinkError::Status { status, body });
            }
            Ok(())
        };

        select! {
            biased;

            _ = self.cancel.cancelled() => Err(SinkError::Cancelled),
            res = tokio::time::timeout(self.timeout, exchange) => match res {
                Ok(r) => r,
                Err(_) => Err(SinkError::Request(format!(
                    "request timed out after {:?}",
                    self.timeout
                ))),
            },
        }
    }
}

impl Sink for LokiSink {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        let body = self.encode(event)?;

        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SinkError::Cancelled);
            }
            attempt += 1;

            let err = match self.push(body.clone()).await {
                Ok(()) => return Ok(()),
                Err(SinkError::Cancelled) => return Err(SinkError::Cancelled),
                Err(e) => e,
            };

            if attempt >= self.retry.max_attempts {
                return Err(SinkError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.retry.delay_after(attempt);
            warn!(attempt, ?delay, error = %err, "Loki push failed, retrying");
            select! {
                biased;

                _ = self.cancel.cancelled() => return Err(SinkError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Instant;

    fn new_sink(server: &MockServer, backoff: Duration, cancel: CancellationToken) -> LokiSink {
        let config = LokiConfig::new(format!("http://127.0.0.1:{}/", server.port()))
            .with_labels(BTreeMap::from([("app".to_string(), "api".to_string())]))
            .with_retry(RetryConfig::new(Some(3), Some(backoff)))
            .with_timeout(Duration::from_secs(2));
        LokiSink::new(config, cancel).unwrap()
    }

    #[test]
    fn test_stream_labels() {
        let labels = stream_labels(
            &BTreeMap::from([("app".to_string(), "api".to_string())]),
            || "node-1".to_string(),
            || "prod".to_string(),
        );
        assert_eq!(
            BTreeMap::from([
                ("app".to_string(), "api".to_string()),
                ("env".to_string(), "prod".to_string()),
                ("host".to_string(), "node-1".to_string()),
                ("job".to_string(), "flox".to_string()),
            ]),
            labels
        );

        let configured = BTreeMap::from([
            ("job".to_string(), "pods".to_string()),
            ("host".to_string(), "fixed".to_string()),
            ("env".to_string(), "".to_string()),
        ]);
        let labels = stream_labels(
            &configured,
            || panic!("host label is configured"),
            || panic!("env label is configured"),
        );
        assert_eq!(configured, labels);
    }

    #[tokio::test]
    async fn test_push_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PUSH_PATH)
                    .header("content-type", "application/json")
                    .body_contains(r#""app":"api""#)
                    .body_contains(r#""job":"flox""#)
                    .body_contains(r#"{\"msg\":\"hello\"}"#);
                then.status(204);
            })
            .await;

        let sink = new_sink(&server, Duration::from_millis(10), CancellationToken::new());
        let event = Event::try_from(json!({"msg": "hello"})).unwrap();
        sink.send(&event).await.unwrap();

        assert_eq!(1, mock.hits_async().await);
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let sink = LokiSink::new(
            LokiConfig::new("http://localhost:3100"),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!("http://localhost:3100/loki/api/v1/push", sink.uri.to_string());

        let body = sink
            .encode(&Event::try_from(json!({"a": 1})).unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();

        let stream = &payload["streams"][0];
        assert_eq!("flox", stream["stream"]["job"]);
        let value = stream["values"][0].as_array().unwrap();
        assert_eq!(2, value.len());
        assert!(value[0].as_str().unwrap().parse::<i64>().unwrap() > 0);
        assert_eq!(r#"{"a":1}"#, value[1]);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PUSH_PATH);
                then.status(500).body("ingester unavailable");
            })
            .await;

        let backoff = Duration::from_millis(50);
        let sink = new_sink(&server, backoff, CancellationToken::new());

        let start = Instant::now();
        let err = sink.send(&Event::new()).await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(3, mock.hits_async().await);
        match &err {
            SinkError::RetriesExhausted { attempts, source } => {
                assert_eq!(3, *attempts);
                assert!(matches!(
                    source.as_ref(),
                    SinkError::Status { status, body }
                        if status.as_u16() == 500 && body == "ingester unavailable"
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("all retries failed: "));

        // Waits of 1x and 2x the backoff unit between the three attempts.
        assert!(sink.retry.delay_after(1) < sink.retry.delay_after(2));
        assert!(elapsed >= backoff * 3);
    }

    #[tokio::test]
    async fn test_backoff_grows_between_attempts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PUSH_PATH);
                then.status(502);
            })
            .await;

        let backoff = Duration::from_millis(150);
        let sink = new_sink(&server, backoff, CancellationToken::new());
        let send = tokio::spawn(async move { sink.send(&Event::new()).await });

        // Note when each attempt reaches the server.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut arrivals = Vec::new();
        while arrivals.len() < 3 {
            assert!(Instant::now() < deadline, "saw {} attempts", arrivals.len());
            let hits = mock.hits_async().await;
            while arrivals.len() < hits {
                arrivals.push(Instant::now());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, SinkError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(3, mock.hits_async().await);

        let first_gap = arrivals[1] - arrivals[0];
        let second_gap = arrivals[2] - arrivals[1];
        assert!(first_gap >= backoff / 2, "first gap {first_gap:?}");
        assert!(
            second_gap > first_gap,
            "gaps did not grow: {first_gap:?} then {second_gap:?}"
        );
    }

    #[tokio::test]
    async fn test_recovers_after_failure() {
        let server = MockServer::start_async().await;
        let mut failing = server
            .mock_async(|when, then| {
                when.method(POST).path(PUSH_PATH);
                then.status(429);
            })
            .await;

        let sink = new_sink(&server, Duration::from_millis(200), CancellationToken::new());
        let send = tokio::spawn(async move { sink.send(&Event::new()).await });

        // Swap in a healthy endpoint while the sink waits out its first backoff.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(1, failing.hits_async().await);
        failing.delete_async().await;
        let healthy = server
            .mock_async(|when, then| {
                when.method(POST).path(PUSH_PATH);
                then.status(200);
            })
            .await;

        send.await.unwrap().unwrap();
        assert_eq!(1, healthy.hits_async().await);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PUSH_PATH);
                then.status(200);
            })
            .await;

        let cancel = CancellationToken::new();
        let sink = new_sink(&server, Duration::from_millis(10), cancel.clone());
        cancel.cancel();

        let err = sink.send(&Event::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(0, mock.hits_async().await);
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PUSH_PATH);
                then.status(503);
            })
            .await;

        let cancel = CancellationToken::new();
        let sink = new_sink(&server, Duration::from_secs(30), cancel.clone());
        let send = tokio::spawn(async move { sink.send(&Event::new()).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), send)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(1, mock.hits_async().await);
    }
}
