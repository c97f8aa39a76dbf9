//! Resumability ledger.
//!
//! A marker records that a unit of work (a tile extraction, a model, a tile
//! classification) was already submitted. Markers are the only state carried
//! between runs. The filesystem store keeps them as zero-byte files at
//! `{root}/{namespace}/{name}.txt`; the `MarkerStore` trait lets a key-value
//! store stand in without touching stage logic.
//!
//! A submission marker is not a completion marker. It prevents a second
//! submission; it says nothing about whether the remote output exists yet.
//! Consumers must check the output artifact itself.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{IoContext, PipelineError, Result};
use crate::remote::JobTicket;

/// Ledger namespaces, one per submitting stage.
pub mod namespace {
    pub const EXTRACTION: &str = "extraction_submitted";
    pub const MODELS: &str = "models_created";
    pub const CLASSIFICATION: &str = "classification_submitted";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerKey {
    pub namespace: String,
    pub name: String,
}

impl MarkerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

pub trait MarkerStore {
    fn exists(&self, key: &MarkerKey) -> Result<bool>;

    /// Create the marker if absent. Returns `true` when this call created it;
    /// a concurrent or earlier creation is not an error.
    fn mark(&self, key: &MarkerKey) -> Result<bool>;

    /// Number of markers in `namespace` whose name starts with `prefix`.
    fn count_prefixed(&self, namespace: &str, prefix: &str) -> Result<usize>;
}

// ── Filesystem store ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FsMarkerStore {
    root: PathBuf,
}

impl FsMarkerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, key: &MarkerKey) -> PathBuf {
        self.root.join(&key.namespace).join(format!("{}.txt", key.name))
    }
}

impl MarkerStore for FsMarkerStore {
    fn exists(&self, key: &MarkerKey) -> Result<bool> {
        Ok(self.path_of(key).is_file())
    }

    fn mark(&self, key: &MarkerKey) -> Result<bool> {
        let path = self.path_of(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).at(dir)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    fn count_prefixed(&self, namespace: &str, prefix: &str) -> Result<usize> {
        let dir = self.root.join(namespace);
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut n = 0;
        for entry in fs::read_dir(&dir).at(&dir)? {
            let entry = entry.at(&dir)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && name.ends_with(".txt") {
                n += 1;
            }
        }
        Ok(n)
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Process-local store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    keys: Mutex<BTreeSet<MarkerKey>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> std::sync::MutexGuard<'_, BTreeSet<MarkerKey>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn exists(&self, key: &MarkerKey) -> Result<bool> {
        Ok(self.keys().contains(key))
    }

    fn mark(&self, key: &MarkerKey) -> Result<bool> {
        Ok(self.keys().insert(key.clone()))
    }

    fn count_prefixed(&self, namespace: &str, prefix: &str) -> Result<usize> {
        Ok(self
            .keys()
            .iter()
            .filter(|k| k.namespace == namespace && k.name.starts_with(prefix))
            .count())
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────────

/// Result of asking the tracker to submit a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The unit's output artifact already exists; nothing submitted.
    OutputPresent,
    /// A submission marker exists; nothing submitted.
    AlreadySubmitted,
    Submitted(JobTicket),
}

impl SubmitOutcome {
    pub fn submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted(_))
    }
}

/// Guards job submission for one ledger namespace.
pub struct JobTracker<'a> {
    store: &'a dyn MarkerStore,
    namespace: &'a str,
}

impl<'a> JobTracker<'a> {
    pub fn new(store: &'a dyn MarkerStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    pub fn key(&self, name: &str) -> MarkerKey {
        MarkerKey::new(self.namespace, name)
    }

    pub fn is_submitted(&self, name: &str) -> Result<bool> {
        self.store.exists(&self.key(name))
    }

    pub fn count_prefixed(&self, prefix: &str) -> Result<usize> {
        self.store.count_prefixed(self.namespace, prefix)
    }

    /// Submit `name` unless its output artifact or its marker exists. The
    /// marker is written only after `submit` succeeds, so a failed submission
    /// is retried on the next run.
    pub fn submit_once<F>(&self, name: &str, output: Option<&Path>, submit: F) -> Result<SubmitOutcome>
    where
        F: FnOnce() -> Result<JobTicket>,
    {
        if output.is_some_and(Path::exists) {
            return Ok(SubmitOutcome::OutputPresent);
        }
        let key = self.key(name);
        if self.store.exists(&key)? {
            return Ok(SubmitOutcome::AlreadySubmitted);
        }
        let ticket = submit()?;
        if !self.store.mark(&key)? {
            log::warn!("marker {}/{} appeared during submission", key.namespace, key.name);
        }
        Ok(SubmitOutcome::Submitted(ticket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn ticket(name: &str) -> JobTicket {
        JobTicket { job_name: name.to_string() }
    }

    #[test]
    fn fs_marker_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMarkerStore::new(dir.path());
        let key = MarkerKey::new(namespace::MODELS, "GMW-01_mdl_1");
        assert!(!store.exists(&key).unwrap());
        assert!(store.mark(&key).unwrap());
        assert!(!store.mark(&key).unwrap());
        assert!(store.exists(&key).unwrap());
        let path = store.path_of(&key);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert!(path.ends_with("models_created/GMW-01_mdl_1.txt"));
    }

    #[test]
    fn fs_count_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMarkerStore::new(dir.path());
        for name in ["A_mdl_1", "A_mdl_2", "B_mdl_1"] {
            store.mark(&MarkerKey::new(namespace::MODELS, name)).unwrap();
        }
        assert_eq!(store.count_prefixed(namespace::MODELS, "A_mdl_").unwrap(), 2);
        assert_eq!(store.count_prefixed(namespace::EXTRACTION, "A").unwrap(), 0);
    }

    #[test]
    fn second_run_submits_nothing() {
        let store = MemoryMarkerStore::new();
        let tracker = JobTracker::new(&store, namespace::EXTRACTION);
        let calls = Cell::new(0);
        let submit = || {
            calls.set(calls.get() + 1);
            Ok(ticket("T1_cls_smpls"))
        };
        assert!(tracker.submit_once("T1_cls_smpls", None, submit).unwrap().submitted());
        let again = tracker.submit_once("T1_cls_smpls", None, submit).unwrap();
        assert_eq!(again, SubmitOutcome::AlreadySubmitted);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn preexisting_marker_blocks_submission() {
        let store = MemoryMarkerStore::new();
        store.mark(&MarkerKey::new(namespace::EXTRACTION, "T9")).unwrap();
        let tracker = JobTracker::new(&store, namespace::EXTRACTION);
        for _ in 0..2 {
            let out = tracker
                .submit_once("T9", None, || panic!("must not submit"))
                .unwrap();
            assert_eq!(out, SubmitOutcome::AlreadySubmitted);
        }
    }

    #[test]
    fn present_output_blocks_submission() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("T1_cls_smpls.csv");
        fs::write(&out, "class\n1\n").unwrap();
        let store = MemoryMarkerStore::new();
        let tracker = JobTracker::new(&store, namespace::EXTRACTION);
        let res = tracker.submit_once("T1", Some(out.as_path()), || panic!("must not submit")).unwrap();
        assert_eq!(res, SubmitOutcome::OutputPresent);
    }

    #[test]
    fn failed_submission_leaves_no_marker() {
        let store = MemoryMarkerStore::new();
        let tracker = JobTracker::new(&store, namespace::MODELS);
        let res = tracker.submit_once("P_mdl_1", None, || {
            Err(PipelineError::Remote { job: "P_mdl_1".into(), reason: "quota".into() })
        });
        assert!(res.is_err());
        assert!(!tracker.is_submitted("P_mdl_1").unwrap());
    }
}
