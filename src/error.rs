//! Error types for sync cycles.
//!
//! Every failure kind gets its own variant so callers can tell a fatal
//! phase error from a per-file one without matching on strings.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The whole cycle is aborted (or never started).
    Cycle,
    /// Only the current phase is aborted.
    Phase,
    /// Only one file is affected; siblings keep going.
    File,
}

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local I/O failure while walking the tree.
    #[error("failed to walk {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// HEAD failed with something other than "not found".
    #[error("failed to look up remote object {key}: {source}")]
    RemoteLookup {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The local file could not be stat'ed during change detection.
    #[error("failed to read metadata of {}: {source}", path.display())]
    LocalMetadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The local file could not be read while hashing.
    #[error("failed to hash {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Single-shot or multipart upload failed.
    #[error("failed to upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Listing the remote keys failed; reconciliation is skipped.
    #[error("failed to list remote objects: {source}")]
    ReconcileList {
        #[source]
        source: StoreError,
    },

    /// A single stale object could not be deleted.
    #[error("failed to delete remote object {key}: {source}")]
    ReconcileDelete {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Another cycle is still running on the same engine.
    #[error("a sync cycle is already in progress")]
    CycleInProgress,
}

impl SyncError {
    /// Classify the error by how far it reaches.
    pub fn scope(&self) -> ErrorScope {
        match self {
            SyncError::Scan { .. } | SyncError::Config(_) | SyncError::CycleInProgress => {
                ErrorScope::Cycle
            }
            SyncError::ReconcileList { .. } => ErrorScope::Phase,
            SyncError::RemoteLookup { .. }
            | SyncError::LocalMetadata { .. }
            | SyncError::Hash { .. }
            | SyncError::Upload { .. }
            | SyncError::ReconcileDelete { .. } => ErrorScope::File,
        }
    }

    /// Whether this error only affects a single file.
    pub fn is_per_file(&self) -> bool {
        self.scope() == ErrorScope::File
    }
}

/// A per-file failure recorded in an outcome.
#[derive(Debug)]
pub struct FileFailure {
    pub key: String,
    pub error: SyncError,
}

impl FileFailure {
    pub fn new(key: impl Into<String>, error: SyncError) -> Self {
        Self {
            key: key.into(),
            error,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
