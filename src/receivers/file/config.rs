// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file receiver.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Where to start reading a file that has no saved offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum StartFrom {
    /// Skip content already present and only read new lines
    #[default]
    Latest,
    /// Read the file from byte 0
    Beginning,
}

// Anything other than exactly "latest" reads from the start of the file. An
// unset value means "latest".
impl From<&str> for StartFrom {
    fn from(s: &str) -> Self {
        if s == "latest" || s.is_empty() {
            StartFrom::Latest
        } else {
            StartFrom::Beginning
        }
    }
}

impl From<String> for StartFrom {
    fn from(s: String) -> Self {
        StartFrom::from(s.as_str())
    }
}

/// Configuration for the file receiver
#[derive(Debug, Clone)]
pub struct FileReceiverConfig {
    /// Glob pattern for files to tail
    pub path: String,
    /// Only tail pods from this namespace, empty for all namespaces
    pub namespace: String,
    /// Persist and resume from per-file read offsets
    pub track_offset: bool,
    /// Where to start reading files without a saved offset
    pub start_from: StartFrom,
    /// How often to rescan the glob for new files
    pub discovery_interval: Duration,
    /// Sleep between reads once a file has no more complete lines
    pub idle_interval: Duration,
    /// Path of the offset state file
    pub offsets_path: PathBuf,
}

impl Default for FileReceiverConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            namespace: String::new(),
            track_offset: false,
            start_from: StartFrom::Latest,
            discovery_interval: Duration::from_secs(10),
            idle_interval: Duration::from_secs(1),
            offsets_path: PathBuf::from(".flox.state"),
        }
    }
}

impl FileReceiverConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("a path pattern must be specified for file input".to_string());
        }
        if self.discovery_interval.is_zero() {
            return Err("discovery interval must be greater than zero".to_string());
        }
        Ok(())
    }
}
