// SPDX-License-Identifier: Apache-2.0

//! Output sinks.
//!
//! Every sink accepts one event at a time through [`Sink::send`] and fails
//! fast with [`SinkError::Cancelled`] once its cancellation token has fired,
//! before any I/O is attempted.

pub mod factory;
pub mod file;
mod http_client;
#[cfg(feature = "rdkafka")]
pub mod kafka;
pub mod loki;
pub mod retry;
pub mod stdout;

pub use factory::{ConfigError, build_sink};

use std::future::Future;

use http::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::event::Event;

#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink was shut down. Not a delivery failure.
    #[error("send cancelled")]
    Cancelled,

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status code {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("all retries failed: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<SinkError>,
    },

    #[cfg(feature = "rdkafka")]
    #[error("kafka publish failed: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl SinkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SinkError::Cancelled)
    }
}

/// A delivery destination for events.
pub trait Sink: Send + Sync {
    fn send(&self, event: &Event) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// The sink selected by pipeline configuration.
pub enum AnySink {
    Stdout(stdout::StdoutSink),
    File(file::FileSink),
    Loki(loki::LokiSink),
    #[cfg(feature = "rdkafka")]
    Kafka(kafka::KafkaSink),
}

impl AnySink {
    pub fn name(&self) -> &'static str {
        match self {
            AnySink::Stdout(_) => "stdout",
            AnySink::File(_) => "file",
            AnySink::Loki(_) => "loki",
            #[cfg(feature = "rdkafka")]
            AnySink::Kafka(_) => "kafka",
        }
    }
}

impl Sink for AnySink {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        match self {
            AnySink::Stdout(s) => s.send(event).await,
            AnySink::File(s) => s.send(event).await,
            AnySink::Loki(s) => s.send(event).await,
            #[cfg(feature = "rdkafka")]
            AnySink::Kafka(s) => s.send(event).await,
        }
    }
}

/// Write the event as one JSON line followed by a newline.
pub(crate) async fn write_json_line<W>(writer: &mut W, event: &Event) -> Result<(), SinkError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut line = event.to_json_line()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
