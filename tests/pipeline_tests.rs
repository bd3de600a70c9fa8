// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests: inputs feeding the dispatcher and a real sink.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use flox::exporters::AnySink;
use flox::exporters::file::FileSink;
use flox::filters::{FilterChain, JsonFilter};
use flox::init::agent::Agent;
use flox::init::config::{InputConfig, OutputConfig, PipelineConfig};
use flox::listener::Listener;
use flox::receivers::file::{
    FileReceiverConfig, FileTailer, JsonFileOffsetStore, MemoryOffsetStore, OffsetStore, StartFrom,
};
use flox::telemetry::PipelineMetrics;
use flox::topology::dispatcher::Dispatcher;

const WAIT: Duration = Duration::from_secs(5);

fn container_log(root: &Path, pod: &str) -> PathBuf {
    let dir = root.join("pods").join(pod).join("app");
    fs::create_dir_all(&dir).unwrap();
    dir.join("0.log")
}

fn append(path: &Path, content: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

fn receiver_config(root: &Path, track_offset: bool) -> FileReceiverConfig {
    FileReceiverConfig {
        path: format!("{}/pods/*/*/*.log", root.display()),
        namespace: "ns1".to_string(),
        track_offset,
        start_from: StartFrom::Beginning,
        discovery_interval: Duration::from_millis(50),
        idle_interval: Duration::from_millis(20),
        offsets_path: root.join("offsets.json"),
    }
}

fn file_dispatcher(
    out: &Path,
    chain: FilterChain,
) -> (Arc<Dispatcher>, PipelineMetrics) {
    let sink = FileSink::open(out, CancellationToken::new()).unwrap();
    let metrics = PipelineMetrics::local();
    let dispatcher = Dispatcher::new(chain, AnySink::File(sink), metrics.clone());
    (Arc::new(dispatcher), metrics)
}

fn start_tailer(
    config: FileReceiverConfig,
    offsets: Arc<dyn OffsetStore>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), BoxError>> {
    let tailer = FileTailer::new(config, offsets, dispatcher);
    tokio::spawn(tailer.run(cancel))
}

async fn wait_for_lines(path: &Path, count: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let lines: Vec<Value> = fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        if lines.len() >= count {
            return lines;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {count} lines, found {}",
            lines.len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn stop(cancel: CancellationToken, handle: JoinHandle<Result<(), BoxError>>) {
    cancel.cancel();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("pipeline did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_lines_delivered_in_order() {
    let dir = TempDir::new().unwrap();
    let log = container_log(dir.path(), "ns1_web-5d9f_uid1");
    append(&log, "{\"n\":1}\n{\"n\":2}\n");

    let out = dir.path().join("out.log");
    let (dispatcher, metrics) = file_dispatcher(&out, FilterChain::default());

    let cancel = CancellationToken::new();
    let handle = start_tailer(
        receiver_config(dir.path(), false),
        Arc::new(MemoryOffsetStore::new()),
        dispatcher,
        cancel.clone(),
    );

    assert_eq!(vec![json!({"n": 1}), json!({"n": 2})], wait_for_lines(&out, 2).await);

    append(&log, "{\"n\":3}\n");
    assert_eq!(json!({"n": 3}), wait_for_lines(&out, 3).await[2]);

    stop(cancel, handle).await;
    assert_eq!(3, metrics.events_received.value());
    assert_eq!(3, metrics.output_success.value());
}

#[tokio::test]
async fn test_invalid_line_skipped_and_filters_applied() {
    let dir = TempDir::new().unwrap();
    let log = container_log(dir.path(), "ns1_api-7c4b_uid2");
    append(
        &log,
        "not json at all\n{\"msg\":\"ok\",\"password\":\"hunter2\"}\n",
    );
    // Pods outside the namespace are never read.
    append(&container_log(dir.path(), "ns2_api-1_uid3"), "{\"msg\":\"other\"}\n");

    let out = dir.path().join("out.log");
    let chain = FilterChain::new(vec![JsonFilter::new(
        vec!["password".into()],
        vec![("msg".into(), "message".into())],
        vec![("pipeline".into(), "flox".into())],
    )]);
    let (dispatcher, metrics) = file_dispatcher(&out, chain);

    let cancel = CancellationToken::new();
    let handle = start_tailer(
        receiver_config(dir.path(), false),
        Arc::new(MemoryOffsetStore::new()),
        dispatcher,
        cancel.clone(),
    );

    let lines = wait_for_lines(&out, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop(cancel, handle).await;

    assert_eq!(vec![json!({"message": "ok", "pipeline": "flox"})], lines);
    assert_eq!(1, fs::read_to_string(&out).unwrap().lines().count());
    assert_eq!(1, metrics.events_received.value());
    assert_eq!(1, metrics.events_filtered.value());
}

#[tokio::test]
async fn test_resume_from_saved_offset() {
    let dir = TempDir::new().unwrap();
    let log = container_log(dir.path(), "ns1_worker-1_uid4");
    append(&log, "{\"n\":1}\n{\"n\":2}\n");
    let out = dir.path().join("out.log");
    let config = receiver_config(dir.path(), true);

    let (dispatcher, _) = file_dispatcher(&out, FilterChain::default());
    let offsets: Arc<dyn OffsetStore> = Arc::new(JsonFileOffsetStore::new(&config.offsets_path));
    let cancel = CancellationToken::new();
    let handle = start_tailer(config.clone(), offsets, dispatcher, cancel.clone());
    wait_for_lines(&out, 2).await;
    stop(cancel, handle).await;

    // Written while the agent was down.
    append(&log, "{\"n\":3}\n");

    let (dispatcher, _) = file_dispatcher(&out, FilterChain::default());
    let offsets: Arc<dyn OffsetStore> = Arc::new(JsonFileOffsetStore::new(&config.offsets_path));
    let cancel = CancellationToken::new();
    let handle = start_tailer(config.clone(), offsets, dispatcher, cancel.clone());
    let lines = wait_for_lines(&out, 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop(cancel, handle).await;

    assert_eq!(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})], lines);
    assert_eq!(3, fs::read_to_string(&out).unwrap().lines().count());

    let state: Value =
        serde_json::from_str(&fs::read_to_string(&config.offsets_path).unwrap()).unwrap();
    let key = std::path::absolute(&log).unwrap();
    assert_eq!(json!(24), state[key.to_string_lossy().as_ref()]);
}

#[tokio::test]
async fn test_http_input_to_file_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("events.log");

    let listener = Listener::listen_async("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.bound_address().unwrap();

    let config = PipelineConfig {
        input: InputConfig {
            input_type: "http".to_string(),
            address: addr.to_string(),
            ..Default::default()
        },
        filters: vec![],
        output: OutputConfig {
            output_type: "file".to_string(),
            target: out.to_string_lossy().into_owned(),
            ..Default::default()
        },
    };

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(
        Agent::new(config)
            .with_http_listener(listener)
            .run(cancel.clone()),
    );

    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(HttpConnector::new());
    let post = |body: &'static str| {
        Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/", addr))
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    };

    let resp = client.request(post(r#"{"event": "login"}"#)).await.unwrap();
    assert_eq!(StatusCode::ACCEPTED, resp.status());
    let resp = client.request(post("[]")).await.unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, resp.status());

    // The event is written before the request is acknowledged.
    let content = fs::read_to_string(&out).unwrap();
    assert_eq!("{\"event\":\"login\"}\n", content);

    stop(cancel, handle).await;
}
