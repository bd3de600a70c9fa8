// SPDX-License-Identifier: Apache-2.0

use tokio::io::{AsyncWrite, Stdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::exporters::{Sink, SinkError, write_json_line};

/// Prints each event as a JSON line on standard output.
pub struct StdoutSink<W = Stdout> {
    writer: Mutex<W>,
    cancel: CancellationToken,
}

impl StdoutSink {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_writer(tokio::io::stdout(), cancel)
    }
}

impl<W> StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_writer(writer: W, cancel: CancellationToken) -> Self {
        Self {
            writer: Mutex::new(writer),
            cancel,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> Sink for StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        let mut writer = self.writer.lock().await;
        write_json_line(&mut *writer, event).await
    }
}
