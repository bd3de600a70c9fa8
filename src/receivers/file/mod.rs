// SPDX-License-Identifier: Apache-2.0

//! File receiver for tailing container log files.
//!
//! This receiver discovers files matching a glob pattern, keeps the ones that
//! belong to pods of interest, reads JSON lines as they are appended and hands
//! each parsed event to the pipeline.
//!
//! Features:
//! - Pod identity filtering from `/var/log/pods` style paths
//! - Inode-based rotation detection
//! - Offset persistence for resume after restarts

pub mod config;
pub mod error;
pub mod file_id;
pub mod matcher;
pub mod offset_store;
pub mod parser;
pub mod tail_task;
pub mod tailer;

pub use config::{FileReceiverConfig, StartFrom};
pub use error::{Error, Result};
pub use file_id::FileId;
pub use matcher::{SourceDescriptor, SourceMatcher, is_eligible};
pub use offset_store::{JsonFileOffsetStore, MemoryOffsetStore, OffsetState, OffsetStore};
pub use tail_task::{TailOutcome, TailTask};
pub use tailer::FileTailer;
