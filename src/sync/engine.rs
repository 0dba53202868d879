//! Sync engine.
//!
//! Runs one mirror cycle: scan the local tree, detect changed files,
//! upload them on the worker pool, then delete remote objects that no
//! longer exist locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use humansize::{format_size, BINARY};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{FileFailure, Result, SyncError};
use crate::store::ObjectStore;
use crate::sync::detect::ChangeDetector;
use crate::sync::dispatch::{SyncOutcome, UploadDispatcher, UploadTask};
use crate::sync::hash::ContentHasher;
use crate::sync::ignore::IgnoreMatcher;
use crate::sync::reconcile::{ReconcileReport, Reconciler};
use crate::sync::scan::Scanner;

/// Result of a completed cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub uploads: SyncOutcome,
    /// `Err` when the remote listing failed and nothing was deleted.
    pub reconcile: Result<ReconcileReport>,
    pub duration: Duration,
}

impl CycleReport {
    /// No per-file upload failure and the remote listing succeeded.
    ///
    /// Failed deletes are logged but do not count.
    pub fn is_success(&self) -> bool {
        !self.uploads.has_failures() && self.reconcile.is_ok()
    }

    pub fn deleted(&self) -> &[String] {
        match &self.reconcile {
            Ok(report) => &report.deleted,
            Err(_) => &[],
        }
    }

    pub fn summary(&self) -> CycleSummary {
        let (deleted, delete_failures, reconcile_error) = match &self.reconcile {
            Ok(report) => (report.deleted_count(), report.failures.len(), None),
            Err(e) => (0, 0, Some(e.to_string())),
        };

        CycleSummary {
            success: self.is_success(),
            uploaded: self.uploads.succeeded,
            skipped: self.uploads.skipped,
            failed: self.uploads.failed(),
            bytes_transferred: self.uploads.bytes_transferred,
            deleted,
            delete_failures,
            reconcile_error,
            failures: self
                .uploads
                .failures
                .iter()
                .map(|f| FailureSummary {
                    key: f.key.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
            duration_ms: self.duration.as_millis() as u64,
        }
    }

    fn log_summary(&self) {
        let summary = self.summary();
        info!(
            uploaded = summary.uploaded,
            skipped = summary.skipped,
            failed = summary.failed,
            transferred = %format_size(summary.bytes_transferred, BINARY),
            deleted = summary.deleted,
            duration_ms = summary.duration_ms,
            "sync cycle finished"
        );
    }
}

/// Serializable view of a [`CycleReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub success: bool,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    pub deleted: usize,
    pub delete_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_error: Option<String>,
    pub failures: Vec<FailureSummary>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub key: String,
    pub error: String,
}

/// Mirrors one local root into one bucket.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn ObjectStore>,
    matcher: IgnoreMatcher,
    detector: ChangeDetector,
    dispatcher: UploadDispatcher,
    reconciler: Reconciler,
    running: AtomicBool,
}

impl SyncEngine {
    /// Validate `config` and build the cycle components.
    pub fn new(config: SyncConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;
        let matcher = config.ignore_matcher()?;
        debug!(patterns = ?matcher.patterns(), "ignore patterns");

        Ok(Self {
            detector: ChangeDetector::new(store.clone(), config.multipart_threshold),
            dispatcher: UploadDispatcher::from_config(store.clone(), &config),
            reconciler: Reconciler::new(store.clone()),
            matcher,
            store,
            config,
            running: AtomicBool::new(false),
        })
    }

    /// Replace the hasher used by change detection.
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.detector = self.detector.with_hasher(hasher);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn matcher(&self) -> &IgnoreMatcher {
        &self.matcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one full cycle.
    ///
    /// A walk error stops task production, waits for the queued uploads
    /// and returns `SyncError::Scan` without reconciling. Per-file
    /// failures are collected in the report and do not stop the cycle.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = CycleGuard::acquire(&self.running)?;
        let started = Instant::now();
        info!(
            root = %self.config.root.display(),
            bucket = %self.config.bucket,
            store = self.store.name(),
            "starting sync cycle"
        );

        let mut scan_error = None;
        let mut skipped = 0;

        let scanner = Scanner::new(&self.config.root, &self.matcher);
        let items = scanner
            .scan()
            .map_while(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    scan_error = Some(e);
                    None
                }
            })
            .filter_map(|entry| {
                match self.detector.needs_upload(&entry.key, &entry.absolute_path) {
                    Ok(decision) if decision.upload => {
                        debug!(key = %entry.key, reason = ?decision.reason, "queued for upload");
                        Some(Ok(UploadTask::from(entry)))
                    }
                    Ok(decision) => {
                        debug!(key = %entry.key, reason = ?decision.reason, "unchanged");
                        skipped += 1;
                        None
                    }
                    Err(error) => Some(Err(FileFailure::new(entry.key, error))),
                }
            });

        let mut uploads = self.dispatcher.dispatch_pipeline(items);
        uploads.skipped = skipped;

        if let Some(e) = scan_error {
            error!(
                error = %e,
                uploaded = uploads.succeeded,
                "scan failed, cycle aborted before reconcile"
            );
            return Err(e);
        }

        let reconcile = self.reconciler.reconcile(&self.config.root);
        if let Err(e) = &reconcile {
            warn!(error = %e, "reconcile skipped");
        }

        let report = CycleReport {
            uploads,
            reconcile,
            duration: started.elapsed(),
        };
        report.log_summary();
        Ok(report)
    }
}

/// Marks a cycle as running until dropped.
struct CycleGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::CycleInProgress)?;
        Ok(Self { running })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
