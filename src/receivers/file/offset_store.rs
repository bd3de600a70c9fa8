// SPDX-License-Identifier: Apache-2.0

//! Durable per-path read offsets.
//!
//! The whole mapping is the unit of persistence: every save reloads the file,
//! sets one entry and rewrites the file, so tailers updating different paths
//! never drop each other's entries.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::receivers::file::error::{Error, Result};

/// Source path -> byte offset just past the last handled line.
pub type OffsetState = BTreeMap<String, i64>;

/// Storage for read offsets, shared by every tailer of a pipeline.
pub trait OffsetStore: Send + Sync {
    /// Current state. Absent or unreadable storage yields an empty mapping.
    fn load(&self) -> OffsetState;

    /// Upsert one entry and persist the full mapping.
    fn save(&self, path: &str, offset: i64) -> Result<()>;

    fn get(&self, path: &str) -> Option<i64> {
        self.load().get(path).copied()
    }
}

/// Offsets kept in a single JSON object file.
#[derive(Debug)]
pub struct JsonFileOffsetStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileOffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OffsetStore for JsonFileOffsetStore {
    fn load(&self) -> OffsetState {
        read_state(&self.path)
    }

    fn save(&self, path: &str, offset: i64) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut state = read_state(&self.path);
        state.insert(path.to_string(), offset);
        atomic_write(&self.path, &state)
    }
}

fn read_state(path: &Path) -> OffsetState {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return OffsetState::new(),
        Err(e) => {
            warn!(path = ?path, error = %e, "Unable to read offset state, starting empty");
            return OffsetState::new();
        }
    };

    match serde_json::from_slice(&data) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = ?path, error = %e, "Offset state is corrupt, starting empty");
            OffsetState::new()
        }
    }
}

/// Replace the file through a uniquely named temp file and a rename, so a
/// concurrent reader sees either the old or the new mapping. No fsync.
fn atomic_write(path: &Path, state: &OffsetState) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write offsets: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush offsets: {}", e)))?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Persistence(format!("failed to rename offset file: {}", e))
    })?;

    Ok(())
}

/// Offsets held in process memory only.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    state: Mutex<OffsetState>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self) -> OffsetState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, path: &str, offset: i64) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), offset);
        Ok(())
    }
}
