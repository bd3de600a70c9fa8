// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::select;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info};

use crate::receivers::file::config::FileReceiverConfig;
use crate::receivers::file::matcher::SourceMatcher;
use crate::receivers::file::offset_store::OffsetStore;
use crate::receivers::file::tail_task::{TailOutcome, TailTask};
use crate::topology::EventHandler;

#[derive(Debug)]
enum TailEntry {
    Active { id: Id, cancel: CancellationToken },
    Skipped,
}

/// FileTailer discovers files matching its pattern and runs one [`TailTask`]
/// per eligible file.
///
/// The tailer is the only owner of the tail registry. Tasks report back by
/// finishing with a [`TailOutcome`]; the tailer reacts to it in the same loop
/// that performs discovery, so registration, removal and rotation relaunch
/// never race with a scan.
pub struct FileTailer<H> {
    config: FileReceiverConfig,
    matcher: SourceMatcher,
    offsets: Arc<dyn OffsetStore>,
    handler: Arc<H>,
    registry: HashMap<PathBuf, TailEntry>,
    tasks: JoinSet<(PathBuf, TailOutcome)>,
}

impl<H: EventHandler> FileTailer<H> {
    pub fn new(config: FileReceiverConfig, offsets: Arc<dyn OffsetStore>, handler: Arc<H>) -> Self {
        let matcher = SourceMatcher::new(config.path.clone(), config.namespace.clone());
        Self {
            config,
            matcher,
            offsets,
            handler,
            registry: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BoxError> {
        info!(
            pattern = self.matcher.pattern(),
            namespace = %self.config.namespace,
            track_offset = self.config.track_offset,
            "Starting file tailer"
        );

        let mut discovery = tokio::time::interval(self.config.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = self.tasks.join_next_with_id() => {
                    self.on_task_exit(joined, &cancel);
                },

                _ = discovery.tick() => self.scan(&cancel),
            }
        }

        self.shutdown().await;
        info!(pattern = self.matcher.pattern(), "File tailer stopped");
        Ok(())
    }

    /// One discovery pass over the pattern.
    fn scan(&mut self, cancel: &CancellationToken) {
        let paths = match self.matcher.matches() {
            Ok(paths) => paths,
            Err(e) => {
                error!(pattern = self.matcher.pattern(), "Failed to expand pattern: {}", e);
                return;
            }
        };

        for path in paths {
            if self.registry.contains_key(&path) {
                continue;
            }

            if !self.matcher.is_eligible(&path) {
                debug!(path = ?path, "Skipping ineligible log file");
                self.registry.insert(path, TailEntry::Skipped);
                continue;
            }

            info!(path = ?path, "New file detected");
            self.launch(path, cancel);
        }
    }

    fn launch(&mut self, path: PathBuf, cancel: &CancellationToken) {
        let task_cancel = cancel.child_token();
        let task = TailTask::new(
            path.clone(),
            &self.config,
            self.offsets.clone(),
            self.handler.clone(),
        );

        let run_cancel = task_cancel.clone();
        let handle = self.tasks.spawn(async move {
            let path = task.path().to_path_buf();
            let outcome = task.run(run_cancel).await;
            (path, outcome)
        });

        self.registry.insert(
            path,
            TailEntry::Active {
                id: handle.id(),
                cancel: task_cancel,
            },
        );
    }

    fn on_task_exit(
        &mut self,
        joined: Result<(Id, (PathBuf, TailOutcome)), JoinError>,
        cancel: &CancellationToken,
    ) {
        let (id, path, outcome) = match joined {
            Ok((id, (path, outcome))) => (id, path, outcome),
            Err(e) => {
                error!("Tail task failed: {}", e);
                if let Some(path) = self.path_for_task(e.id()) {
                    self.registry.remove(&path);
                }
                return;
            }
        };

        // Clear the entry before any relaunch so a path never has two tasks.
        if matches!(self.registry.get(&path), Some(TailEntry::Active { id: active, .. }) if *active == id)
        {
            self.registry.remove(&path);
        }

        match outcome {
            TailOutcome::Rotated if !cancel.is_cancelled() => self.launch(path, cancel),
            TailOutcome::OpenFailed | TailOutcome::ReadFailed => {
                debug!(path = ?path, outcome = ?outcome, "Tail task ended, will retry on next discovery")
            }
            _ => {}
        }
    }

    fn path_for_task(&self, task_id: Id) -> Option<PathBuf> {
        self.registry.iter().find_map(|(path, entry)| match entry {
            TailEntry::Active { id, .. } if *id == task_id => Some(path.clone()),
            _ => None,
        })
    }

    async fn shutdown(&mut self) {
        for entry in self.registry.values() {
            if let TailEntry::Active { cancel, .. } = entry {
                cancel.cancel();
            }
        }
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!("Tail task failed during shutdown: {}", e);
            }
        }
        self.registry.clear();
    }

    /// Paths with a running tail task.
    pub fn active_paths(&self) -> Vec<&Path> {
        self.registry
            .iter()
            .filter(|(_, e)| matches!(e, TailEntry::Active { .. }))
            .map(|(p, _)| p.as_path())
            .collect()
    }

    /// Paths found ineligible and never retried.
    pub fn skipped_paths(&self) -> Vec<&Path> {
        self.registry
            .iter()
            .filter(|(_, e)| matches!(e, TailEntry::Skipped))
            .map(|(p, _)| p.as_path())
            .collect()
    }
}
