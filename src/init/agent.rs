// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::crypto::init_crypto_provider;
use crate::exporters::build_sink;
use crate::filters::FilterChain;
use crate::init::config::PipelineConfig;
use crate::init::wait::{self, TaskSet};
use crate::listener::Listener;
use crate::receivers::file::{FileTailer, JsonFileOffsetStore, MemoryOffsetStore, OffsetStore};
use crate::receivers::http::HttpReceiver;
use crate::telemetry::PipelineMetrics;
use crate::topology::dispatcher::Dispatcher;

const RECEIVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs one pipeline: an input feeding the dispatcher, which filters events
/// and hands them to the configured output.
pub struct Agent {
    config: PipelineConfig,
    http_listener: Option<Listener>,
    #[cfg(feature = "prometheus")]
    metrics_listener: Option<Listener>,
}

impl Agent {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            http_listener: None,
            #[cfg(feature = "prometheus")]
            metrics_listener: None,
        }
    }

    /// Listener for the http input. Bound on demand when not provided.
    pub fn with_http_listener(mut self, listener: Listener) -> Self {
        self.http_listener = Some(listener);
        self
    }

    #[cfg(feature = "prometheus")]
    pub fn with_metrics_listener(mut self, listener: Listener) -> Self {
        self.metrics_listener = Some(listener);
        self
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;
        config.validate()?;

        info!(
            input = %config.input.input_type,
            output = %config.output.output_type,
            filters = config.filters.len(),
            "Starting flox."
        );

        init_crypto_provider()?;

        let mut receivers_task_set = TaskSet::new();
        let mut metrics_task_set = TaskSet::new();

        let receivers_cancel = agent_cancel.child_token();
        let sink_cancel = agent_cancel.child_token();
        let metrics_cancel = CancellationToken::new();

        // The meter provider must be installed before the pipeline counters
        // are created.
        #[cfg(feature = "prometheus")]
        if let Some(listener) = self.metrics_listener {
            use crate::telemetry::metrics_server::MetricsServer;
            use opentelemetry_prometheus_text_exporter::PrometheusExporter;
            use opentelemetry_sdk::metrics::SdkMeterProvider;

            let exporter = PrometheusExporter::default();
            let provider = SdkMeterProvider::builder()
                .with_reader(exporter.clone())
                .build();
            opentelemetry::global::set_meter_provider(provider);

            info!(addr = ?listener.bound_address().ok(), "Serving metrics");
            let server = MetricsServer::new(exporter);
            let cancel = metrics_cancel.clone();
            metrics_task_set.spawn(async move { server.serve(listener, cancel).await });
        }

        let sink = build_sink(&config.output, sink_cancel.clone())?;
        let sink_name = sink.name();
        let chain = FilterChain::from_config(&config.filters);
        let dispatcher = Arc::new(Dispatcher::new(chain, sink, PipelineMetrics::otel()));
        debug!(sink = sink_name, "Built output sink");

        match config.input.input_type.as_str() {
            "file" => {
                let file_config = config.file_receiver_config();
                let offsets: Arc<dyn OffsetStore> = if file_config.track_offset {
                    Arc::new(JsonFileOffsetStore::new(file_config.offsets_path.clone()))
                } else {
                    Arc::new(MemoryOffsetStore::new())
                };
                info!(path = %file_config.path, namespace = %file_config.namespace, "Tailing files");

                let tailer = FileTailer::new(file_config, offsets, dispatcher);
                let cancel = receivers_cancel.clone();
                receivers_task_set.spawn(async move { tailer.run(cancel).await });
            }
            "http" => {
                let listener = match self.http_listener {
                    Some(l) => l,
                    None => Listener::listen_async(config.http_address()?).await?,
                };
                info!(addr = ?listener.bound_address().ok(), "Accepting events over HTTP");

                let receiver = HttpReceiver::new(dispatcher);
                let cancel = receivers_cancel.clone();
                receivers_task_set.spawn(async move { receiver.serve(listener, cancel).await });
            }
            other => return Err(format!("unsupported input type: {}", other).into()),
        }

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut receivers_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of receiver."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut metrics_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of metrics server."),
                    Err(e) => result = Err(e),
                }
            },
        }

        receivers_cancel.cancel();
        sink_cancel.cancel();
        let stopped =
            wait::wait_for_tasks_with_timeout(&mut receivers_task_set, RECEIVER_STOP_TIMEOUT).await;

        metrics_cancel.cancel();
        if let Err(e) =
            wait::wait_for_tasks_with_timeout(&mut metrics_task_set, METRICS_STOP_TIMEOUT).await
        {
            warn!(error = %e, "Metrics server did not stop cleanly");
        }

        result?;
        stopped.map_err(|e| format!("failed waiting for receiver exit: {}", e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::config::{InputConfig, OutputConfig};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let agent = Agent::new(PipelineConfig::default());
        let err = agent.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!("'input.type' is required", err.to_string());
    }

    #[tokio::test]
    async fn test_sink_config_error() {
        let config = PipelineConfig {
            input: InputConfig {
                input_type: "http".to_string(),
                address: "127.0.0.1:0".to_string(),
                ..Default::default()
            },
            output: OutputConfig {
                output_type: "s3".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = Agent::new(config)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!("unsupported output type: s3", err.to_string());
    }

    #[tokio::test]
    async fn test_file_pipeline_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("ns1_app-1_uid").join("app");
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(log_dir.join("0.log"), "{\"msg\":\"one\"}\n").unwrap();
        let out = dir.path().join("out.log");

        let config = PipelineConfig {
            input: InputConfig {
                input_type: "file".to_string(),
                path: format!("{}/*/*/*.log", dir.path().display()),
                namespace: "ns1".to_string(),
                idle_interval: Some(Duration::from_millis(20)),
                ..Default::default()
            },
            output: OutputConfig {
                output_type: "file".to_string(),
                target: out.to_string_lossy().into_owned(),
                ..Default::default()
            },
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Agent::new(config).run(cancel.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while fs::read_to_string(&out).unwrap_or_default().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "event never delivered");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!("{\"msg\":\"one\"}\n", fs::read_to_string(&out).unwrap());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[cfg(feature = "prometheus")]
    #[tokio::test]
    async fn test_serves_metrics_endpoint() {
        use bytes::Bytes;
        use http::StatusCode;
        use http_body_util::Empty;
        use hyper_util::client::legacy::Client;
        use hyper_util::client::legacy::connect::HttpConnector;
        use hyper_util::rt::TokioExecutor;

        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            input: InputConfig {
                input_type: "http".to_string(),
                address: "127.0.0.1:0".to_string(),
                ..Default::default()
            },
            output: OutputConfig {
                output_type: "file".to_string(),
                target: dir.path().join("out.log").to_string_lossy().into_owned(),
                ..Default::default()
            },
            ..Default::default()
        };

        let metrics_listener = Listener::listen_async("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = metrics_listener.bound_address().unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Agent::new(config)
                .with_metrics_listener(metrics_listener)
                .run(cancel.clone()),
        );

        let client: Client<HttpConnector, Empty<Bytes>> =
            Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let resp = tokio::time::timeout(
            Duration::from_secs(5),
            client.get(format!("http://{}/metrics", addr).parse().unwrap()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(StatusCode::OK, resp.status());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
