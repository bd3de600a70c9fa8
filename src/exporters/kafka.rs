// SPDX-License-Identifier: Apache-2.0

//! Kafka sink.
//!
//! Events are published as JSON to a single topic. The partition for each
//! record is the one that has been sent the fewest bytes by this sink, using
//! the partition count read from cluster metadata on the first send.

use std::sync::Mutex;
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::select;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::Event;
use crate::exporters::{Sink, SinkError};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub client_id: String,
    pub send_timeout: Duration,
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            client_id: "flox".to_string(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn build_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.brokers.join(","));
        config.set("client.id", &self.client_id);
        // Deliveries are attempted once; failures are reported to the caller.
        config.set("retries", "0");
        config.set("message.timeout.ms", self.send_timeout.as_millis().to_string());
        config
    }
}

/// Picks the partition that has been written the fewest bytes.
#[derive(Debug, Default)]
pub struct LeastBytesBalancer {
    written: Mutex<Vec<u64>>,
}

impl LeastBytesBalancer {
    /// Choose a partition for a record of `size` bytes and account for it.
    /// Ties go to the lowest partition number.
    pub fn pick(&self, partitions: usize, size: u64) -> Option<i32> {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if written.len() != partitions {
            written.resize(partitions, 0);
        }

        let (idx, total) = written
            .iter_mut()
            .enumerate()
            .min_by_key(|(_, total)| **total)?;
        *total += size;
        i32::try_from(idx).ok()
    }

    pub fn written(&self) -> Vec<u64> {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    partitions: OnceCell<usize>,
    balancer: LeastBytesBalancer,
    cancel: CancellationToken,
}

impl KafkaSink {
    pub fn new(config: KafkaConfig, cancel: CancellationToken) -> Result<Self, KafkaError> {
        let producer: FutureProducer = config.build_client_config().create()?;
        debug!(brokers = ?config.brokers, topic = %config.topic, "Created Kafka producer");

        Ok(Self {
            producer,
            topic: config.topic,
            send_timeout: config.send_timeout,
            partitions: OnceCell::new(),
            balancer: LeastBytesBalancer::default(),
            cancel,
        })
    }

    async fn partition_count(&self) -> Result<usize, SinkError> {
        self.partitions
            .get_or_try_init(|| async {
                let producer = self.producer.clone();
                let topic = self.topic.clone();
                let timeout = self.send_timeout;

                let count = tokio::task::spawn_blocking(move || {
                    let metadata = producer
                        .client()
                        .fetch_metadata(Some(&topic), Timeout::After(timeout))?;
                    Ok::<usize, KafkaError>(
                        metadata
                            .topics()
                            .iter()
                            .find(|t| t.name() == topic)
                            .map(|t| t.partitions().len())
                            .unwrap_or_default(),
                    )
                })
                .await
                .map_err(|e| SinkError::Request(format!("metadata lookup failed: {}", e)))??;

                if count == 0 {
                    return Err(SinkError::Request(format!(
                        "no partitions found for topic {}",
                        self.topic
                    )));
                }
                debug!(topic = %self.topic, partitions = count, "Loaded topic metadata");
                Ok(count)
            })
            .await
            .copied()
    }
}

impl Sink for KafkaSink {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }

        let payload = event.to_json_line()?;
        let partitions = self.partition_count().await?;

        let mut record = FutureRecord::<(), str>::to(&self.topic).payload(payload.as_str());
        if let Some(partition) = self.balancer.pick(partitions, payload.len() as u64) {
            record = record.partition(partition);
        }

        select! {
            biased;

            _ = self.cancel.cancelled() => Err(SinkError::Cancelled),
            res = self.producer.send(record, Timeout::After(self.send_timeout)) => match res {
                Ok(_) => Ok(()),
                Err((e, _)) => Err(SinkError::Kafka(e)),
            },
        }
    }
}
