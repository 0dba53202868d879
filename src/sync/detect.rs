//! Change detection.
//!
//! Decides whether a local file must be uploaded by comparing it with the
//! remote object's metadata. Cheap checks (existence, size, timestamps)
//! run first; the content hash is only computed for small files that
//! look newer than their remote copy.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::{ObjectStore, StoreError};
use crate::sync::hash::{ContentHasher, Md5Hasher};

/// Why a file is (or is not) uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    RemoteMissing,
    SizeChanged,
    RemoteTimestampMissing,
    /// Local modification time is not after the remote one.
    RemoteUpToDate,
    /// Large file, local newer; hashing skipped.
    LargeFileNewer,
    /// Remote tag is a multipart tag, local newer; hashing skipped.
    MultipartTagNewer,
    ContentChanged,
    ContentMatches,
}

/// Result of change detection for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub upload: bool,
    pub reason: DecisionReason,
}

impl Decision {
    fn upload(reason: DecisionReason) -> Self {
        Self { upload: true, reason }
    }

    fn skip(reason: DecisionReason) -> Self {
        Self { upload: false, reason }
    }
}

pub struct ChangeDetector {
    store: Arc<dyn ObjectStore>,
    multipart_threshold: u64,
    hasher: Arc<dyn ContentHasher>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn ObjectStore>, multipart_threshold: u64) -> Self {
        Self {
            store,
            multipart_threshold,
            hasher: Arc::new(Md5Hasher),
        }
    }

    /// Replace the content hasher.
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Decide whether `local_path` must be uploaded as `key`.
    ///
    /// Local modification time at or before the remote last-modified time
    /// counts as unchanged even when the content differs. An edit landing
    /// within the remote timestamp granularity is therefore skipped.
    pub fn needs_upload(&self, key: &str, local_path: &Path) -> Result<Decision> {
        let remote = match self.store.head(key) {
            Ok(remote) => remote,
            Err(StoreError::NotFound(_)) => return Ok(Decision::upload(DecisionReason::RemoteMissing)),
            Err(source) => {
                return Err(SyncError::RemoteLookup {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let metadata = fs::metadata(local_path).map_err(|source| SyncError::LocalMetadata {
            path: local_path.to_path_buf(),
            source,
        })?;
        let local_size = metadata.len();

        if local_size != remote.size {
            return Ok(Decision::upload(DecisionReason::SizeChanged));
        }

        let Some(remote_modified) = remote.last_modified else {
            return Ok(Decision::upload(DecisionReason::RemoteTimestampMissing));
        };

        let local_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|source| SyncError::LocalMetadata {
                path: local_path.to_path_buf(),
                source,
            })?;

        if local_modified <= remote_modified {
            return Ok(Decision::skip(DecisionReason::RemoteUpToDate));
        }

        // From here on the local copy is strictly newer.
        if local_size > self.multipart_threshold {
            return Ok(Decision::upload(DecisionReason::LargeFileNewer));
        }

        if remote.is_multipart_etag() {
            return Ok(Decision::upload(DecisionReason::MultipartTagNewer));
        }

        let local_hash = self
            .hasher
            .hash_file(local_path)
            .map_err(|source| SyncError::Hash {
                path: local_path.to_path_buf(),
                source,
            })?;

        if local_hash.eq_ignore_ascii_case(&remote.etag) {
            debug!(key, "content matches remote entity tag");
            Ok(Decision::skip(DecisionReason::ContentMatches))
        } else {
            Ok(Decision::upload(DecisionReason::ContentChanged))
        }
    }
}
