// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::exporters::AnySink;
use crate::exporters::file::FileSink;
use crate::exporters::loki::{DEFAULT_TIMEOUT, LokiConfig, LokiSink};
use crate::exporters::retry::RetryConfig;
use crate::exporters::stdout::StdoutSink;
use crate::init::config::OutputConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported output type: {0}")]
    UnsupportedOutput(String),

    #[error("target not specified for {0} output")]
    MissingTarget(&'static str),

    #[error("brokers not specified for kafka output")]
    MissingBrokers,

    #[error("topic not specified for kafka output")]
    MissingTopic,

    #[error("{0} output requires flox to be built with the '{1}' feature")]
    FeatureDisabled(&'static str, &'static str),

    #[error("failed to initialize {0} output: {1}")]
    Init(&'static str, String),
}

/// Build the sink named by `output.type`.
pub fn build_sink(config: &OutputConfig, cancel: CancellationToken) -> Result<AnySink, ConfigError> {
    match config.output_type.as_str() {
        "stdout" => Ok(AnySink::Stdout(StdoutSink::new(cancel))),
        "file" => {
            if config.target.is_empty() {
                return Err(ConfigError::MissingTarget("file"));
            }
            FileSink::open(&config.target, cancel)
                .map(AnySink::File)
                .map_err(|e| ConfigError::Init("file", e.to_string()))
        }
        "loki" => {
            if config.target.is_empty() {
                return Err(ConfigError::MissingTarget("loki"));
            }
            let loki = LokiConfig::new(config.target.clone())
                .with_labels(config.labels.clone())
                .with_retry(RetryConfig::new(config.max_attempts, config.backoff))
                .with_timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT));
            LokiSink::new(loki, cancel)
                .map(AnySink::Loki)
                .map_err(|e| ConfigError::Init("loki", e.to_string()))
        }
        "kafka" => build_kafka(config, cancel),
        other => Err(ConfigError::UnsupportedOutput(other.to_string())),
    }
}

#[cfg(feature = "rdkafka")]
fn build_kafka(config: &OutputConfig, cancel: CancellationToken) -> Result<AnySink, ConfigError> {
    use crate::exporters::kafka::{DEFAULT_SEND_TIMEOUT, KafkaConfig, KafkaSink};

    check_kafka(config)?;
    let mut kafka = KafkaConfig::new(config.brokers.clone(), config.topic.clone())
        .with_send_timeout(config.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT));
    if !config.client_id.is_empty() {
        kafka = kafka.with_client_id(config.client_id.clone());
    }
    KafkaSink::new(kafka, cancel)
        .map(AnySink::Kafka)
        .map_err(|e| ConfigError::Init("kafka", e.to_string()))
}

#[cfg(not(feature = "rdkafka"))]
fn build_kafka(config: &OutputConfig, _cancel: CancellationToken) -> Result<AnySink, ConfigError> {
    check_kafka(config)?;
    Err(ConfigError::FeatureDisabled("kafka", "rdkafka"))
}

fn check_kafka(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.brokers.is_empty() {
        return Err(ConfigError::MissingBrokers);
    }
    if config.topic.is_empty() {
        return Err(ConfigError::MissingTopic);
    }
    Ok(())
}
