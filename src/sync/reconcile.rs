//! Remote deletion of keys that no longer exist locally.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{FileFailure, Result, SyncError};
use crate::store::ObjectStore;
use crate::sync::scan::Scanner;

/// What a reconcile pass removed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Deleted keys in lexical order.
    pub deleted: Vec<String>,
    /// Deletes that failed; the pass kept going.
    pub failures: Vec<FileFailure>,
}

impl ReconcileReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Deletes remote objects whose key has no local file.
///
/// The local side is walked without the ignore matcher: an ignored file
/// that still exists locally keeps its remote copy, and an ignored key
/// with no local file is deleted like any other stale key.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Delete every remote key without a local file under `root`.
    ///
    /// Any walk error aborts the pass before anything is listed or
    /// deleted, so a directory that cannot be read never looks empty.
    pub fn reconcile(&self, root: &Path) -> Result<ReconcileReport> {
        let local: HashSet<String> = Scanner::unfiltered(root)
            .scan()
            .map(|entry| entry.map(|entry| entry.key))
            .collect::<Result<_>>()?;

        let remote: BTreeSet<String> = self
            .store
            .list_all("")
            .map_err(|source| SyncError::ReconcileList { source })?
            .into_iter()
            .collect();

        debug!(local = local.len(), remote = remote.len(), "reconciling key sets");

        let mut report = ReconcileReport::default();
        for key in remote.into_iter().filter(|key| !local.contains(key)) {
            match self.store.delete(&key) {
                Ok(()) => {
                    info!(key = %key, "deleted remote object");
                    report.deleted.push(key);
                }
                Err(source) => {
                    warn!(key = %key, error = %source, "failed to delete remote object");
                    let error = SyncError::ReconcileDelete {
                        key: key.clone(),
                        source,
                    };
                    report.failures.push(FileFailure::new(key, error));
                }
            }
        }

        Ok(report)
    }
}
