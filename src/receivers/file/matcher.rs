// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::receivers::file::error::{Error, Result};

/// Owners whose logs never enter the pipeline: cluster infrastructure and
/// the log stack itself.
const DENIED_OWNER_PREFIXES: &[&str] = &[
    "istio-proxy",
    "coredns",
    "etcd",
    "kube-proxy",
    "metrics-server",
    "loki",
    "grafana",
    "flox",
];

/// Identity of a pod log file, parsed from a path of the form
/// `.../<namespace>_<owner>_<uid>/<container>/<n>.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub namespace: String,
    pub owner_name: String,
}

impl SourceDescriptor {
    /// Parse the identity out of the pod directory, the parent of the container
    /// directory. Returns None when the directory name has fewer than three
    /// `_`-separated parts.
    pub fn parse(path: &Path) -> Option<Self> {
        let pod_dir = path.parent()?.parent()?.file_name()?.to_str()?;

        let mut parts = pod_dir.splitn(3, '_');
        let namespace = parts.next()?;
        let owner_name = parts.next()?;
        parts.next()?;

        Some(Self {
            path: path.to_path_buf(),
            namespace: namespace.to_string(),
            owner_name: owner_name.to_string(),
        })
    }

    pub fn is_denied_owner(&self) -> bool {
        DENIED_OWNER_PREFIXES
            .iter()
            .any(|prefix| self.owner_name.starts_with(prefix))
    }
}

/// Decide whether a path is a source worth tailing for the given namespace
/// filter. An empty filter admits every namespace.
pub fn is_eligible(path: &Path, namespace: &str) -> bool {
    let Some(desc) = SourceDescriptor::parse(path) else {
        return false;
    };
    if !namespace.is_empty() && desc.namespace != namespace {
        return false;
    }
    !desc.is_denied_owner()
}

/// SourceMatcher expands a glob pattern into candidate files and filters them
/// by pod identity.
#[derive(Debug, Clone)]
pub struct SourceMatcher {
    pattern: String,
    namespace: String,
}

impl SourceMatcher {
    pub fn new(pattern: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            namespace: namespace.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// All regular files currently matching the pattern, sorted and free of
    /// duplicates. Entries that can't be read during expansion are skipped.
    pub fn matches(&self) -> Result<Vec<PathBuf>> {
        let entries = glob(&self.pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

        let mut paths = BTreeSet::new();
        for entry in entries.flatten() {
            if entry.is_dir() {
                continue;
            }
            paths.insert(entry);
        }

        Ok(paths.into_iter().collect())
    }

    pub fn is_eligible(&self, path: &Path) -> bool {
        is_eligible(path, &self.namespace)
    }

    /// Descriptor for an eligible path, None otherwise.
    pub fn describe(&self, path: &Path) -> Option<SourceDescriptor> {
        if !self.is_eligible(path) {
            return None;
        }
        SourceDescriptor::parse(path)
    }
}
