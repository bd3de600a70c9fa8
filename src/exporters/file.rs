// SPDX-License-Identifier: Apache-2.0

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::Event;
use crate::exporters::{Sink, SinkError, write_json_line};

/// Appends each event as a JSON line to a local file.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
    cancel: CancellationToken,
}

impl FileSink {
    /// Open `path` for appending, creating it with mode 0644 when missing.
    pub fn open(path: impl AsRef<Path>, cancel: CancellationToken) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(&path)?;
        debug!(path = ?path, "Opened output file");

        Ok(Self {
            path,
            file: Mutex::new(File::from_std(file)),
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    async fn send(&self, event: &Event) -> Result<(), SinkError> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        let mut file = self.file.lock().await;
        write_json_line(&mut *file, event).await
    }
}
