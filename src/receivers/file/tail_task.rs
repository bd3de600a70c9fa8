// SPDX-License-Identifier: Apache-2.0

//! Per-file tailing.
//!
//! A [`TailTask`] follows a single path through its lifecycle:
//!
//! 1. **Opening** - open the path and capture its [`FileId`].
//! 2. **Seeking** - resume from a saved offset, or apply the start policy.
//! 3. **Tailing** - read complete lines, parse them into events and hand each
//!    one to the handler, persisting the offset after every handled event.
//! 4. **Idle** - when no complete line is available, sleep and then compare the
//!    identity of the open handle with the identity now found at the path.
//!
//! The task never touches the tail registry. It returns a [`TailOutcome`] and
//! the coordinator that spawned it decides what happens next.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::receivers::file::config::{FileReceiverConfig, StartFrom};
use crate::receivers::file::file_id::FileId;
use crate::receivers::file::offset_store::OffsetStore;
use crate::receivers::file::parser;
use crate::topology::EventHandler;

/// Why a tail task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailOutcome {
    /// The cancellation token fired.
    Cancelled,
    /// The path now names a different file.
    Rotated,
    /// The path could not be opened or positioned.
    OpenFailed,
    /// Reading failed with something other than end-of-file.
    ReadFailed,
}

#[derive(Debug, PartialEq, Eq)]
enum SourceCheck {
    Unchanged,
    Rotated,
    Truncated,
}

pub struct TailTask<H> {
    path: PathBuf,
    key: String,
    track_offset: bool,
    start_from: StartFrom,
    idle_interval: Duration,
    offsets: Arc<dyn OffsetStore>,
    handler: Arc<H>,
}

impl<H: EventHandler> TailTask<H> {
    pub fn new(
        path: PathBuf,
        config: &FileReceiverConfig,
        offsets: Arc<dyn OffsetStore>,
        handler: Arc<H>,
    ) -> Self {
        let key = offset_key(&path);
        Self {
            path,
            key,
            track_offset: config.track_offset,
            start_from: config.start_from,
            idle_interval: config.idle_interval,
            offsets,
            handler,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run(self, cancel: CancellationToken) -> TailOutcome {
        let (reader, file_id, position) = match self.open().await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to open file");
                return TailOutcome::OpenFailed;
            }
        };

        info!(path = ?self.path, file_id = %file_id, position, "Start tailing");
        let outcome = self.tail(reader, file_id, position, &cancel).await;
        debug!(path = ?self.path, outcome = ?outcome, "Stopped tailing");
        outcome
    }

    async fn open(&self) -> io::Result<(BufReader<File>, FileId, u64)> {
        let mut file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        let file_id = FileId::from_metadata(&metadata);

        let position = self.start_position(metadata.len()).await;
        if position > 0 {
            file.seek(SeekFrom::Start(position)).await?;
        }

        Ok((BufReader::new(file), file_id, position))
    }

    async fn start_position(&self, len: u64) -> u64 {
        if !self.track_offset {
            return 0;
        }

        if let Some(offset) = self.saved_offset().await {
            info!(path = ?self.path, offset, "Resuming from saved offset");
            return offset.max(0) as u64;
        }

        match self.start_from {
            StartFrom::Latest => {
                debug!(path = ?self.path, "No saved offset, starting from end of file");
                len
            }
            StartFrom::Beginning => {
                debug!(path = ?self.path, "No saved offset, starting from beginning");
                0
            }
        }
    }

    async fn tail(
        &self,
        mut reader: BufReader<File>,
        file_id: FileId,
        mut position: u64,
        cancel: &CancellationToken,
    ) -> TailOutcome {
        let mut line = Vec::with_capacity(4096);
        let mut failing = false;

        loop {
            if cancel.is_cancelled() {
                return TailOutcome::Cancelled;
            }

            match reader.read_until(b'\n', &mut line).await {
                Ok(_) if line.last() == Some(&b'\n') => {
                    position += line.len() as u64;
                    self.process_line(&line, position, &mut failing).await;
                    line.clear();
                }
                // End of available content. A partial line stays in the buffer
                // until the writer finishes it.
                Ok(_) => {
                    select! {
                        biased;
                        _ = cancel.cancelled() => return TailOutcome::Cancelled,
                        _ = sleep(self.idle_interval) => {}
                    }

                    match self.check_source(file_id, position + line.len() as u64).await {
                        SourceCheck::Unchanged => {}
                        SourceCheck::Rotated => {
                            info!(path = ?self.path, file_id = %file_id, "File rotated, reopening");
                            self.reset_offset().await;
                            return TailOutcome::Rotated;
                        }
                        SourceCheck::Truncated => {
                            warn!(path = ?self.path, position, "File truncated, reading from the beginning");
                            if let Err(e) = reader.seek(SeekFrom::Start(0)).await {
                                error!(path = ?self.path, error = %e, "Failed to seek truncated file");
                                return TailOutcome::ReadFailed;
                            }
                            line.clear();
                            position = 0;
                        }
                    }
                }
                Err(e) => {
                    error!(path = ?self.path, error = %e, "Failed to read file");
                    return TailOutcome::ReadFailed;
                }
            }
        }
    }

    async fn process_line(&self, line: &[u8], position: u64, failing: &mut bool) {
        let event = match parser::parse_line(line) {
            Ok(event) => event,
            Err(e) => {
                // Only the first line of a run of bad lines is reported.
                if !*failing {
                    warn!(
                        path = ?self.path,
                        error = %e,
                        line = %String::from_utf8_lossy(line).trim_end(),
                        "Skipping line that is not a JSON object"
                    );
                    *failing = true;
                }
                return;
            }
        };
        *failing = false;

        self.handler.handle(event).await;

        if self.track_offset {
            self.persist_offset(position as i64).await;
        }
    }

    async fn check_source(&self, file_id: FileId, position: u64) -> SourceCheck {
        // A missing path is usually the gap between rename and re-create.
        let Ok(metadata) = tokio::fs::metadata(&self.path).await else {
            return SourceCheck::Unchanged;
        };

        if FileId::from_metadata(&metadata) != file_id {
            SourceCheck::Rotated
        } else if metadata.len() < position {
            SourceCheck::Truncated
        } else {
            SourceCheck::Unchanged
        }
    }

    async fn saved_offset(&self) -> Option<i64> {
        let offsets = self.offsets.clone();
        let key = self.key.clone();
        match tokio::task::spawn_blocking(move || offsets.get(&key)).await {
            Ok(offset) => offset,
            Err(e) => {
                error!(path = ?self.path, "Failed to load saved offset: {}", e);
                None
            }
        }
    }

    async fn persist_offset(&self, offset: i64) {
        let offsets = self.offsets.clone();
        let key = self.key.clone();
        match tokio::task::spawn_blocking(move || offsets.save(&key, offset)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = ?self.path, offset, error = %e, "Failed to save offset"),
            Err(e) => error!(path = ?self.path, "Offset save task failed: {}", e),
        }
    }

    // The saved offset belongs to the rotated-away file; the file now at
    // the path starts from zero.
    async fn reset_offset(&self) {
        if self.track_offset {
            self.persist_offset(0).await;
        }
    }
}

/// Offsets are keyed by absolute path so relative glob patterns resolve to
/// the same entry across restarts.
fn offset_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
