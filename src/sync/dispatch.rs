//! Upload dispatching.
//!
//! A fixed pool of worker threads drains a bounded queue of upload tasks.
//! The producer (the caller's thread) blocks while the queue is full, so
//! the scan never runs far ahead of the uploads.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{FileFailure, Result, SyncError};
use crate::store::{ObjectStore, StoreError};
use crate::sync::multipart::MultipartUploader;
use crate::sync::scan::LocalEntry;

/// A file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub key: String,
    pub absolute_path: PathBuf,
    pub size: u64,
}

impl From<LocalEntry> for UploadTask {
    fn from(entry: LocalEntry) -> Self {
        Self {
            key: entry.key,
            absolute_path: entry.absolute_path,
            size: entry.size,
        }
    }
}

/// Aggregated result of one dispatch run.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Files uploaded.
    pub succeeded: usize,
    pub bytes_transferred: u64,
    /// Files found unchanged by change detection.
    pub skipped: usize,
    /// Per-file failures in the order they were recorded.
    pub failures: Vec<FileFailure>,
}

impl SyncOutcome {
    pub fn record_success(&mut self, bytes: u64) {
        self.succeeded += 1;
        self.bytes_transferred += bytes;
    }

    pub fn record_failure(&mut self, failure: FileFailure) {
        self.failures.push(failure);
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs uploads on a bounded worker pool.
pub struct UploadDispatcher {
    store: Arc<dyn ObjectStore>,
    workers: usize,
    queue_capacity: usize,
    multipart_threshold: u64,
    multipart: MultipartUploader,
}

impl UploadDispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        workers: usize,
        queue_capacity: usize,
        multipart_threshold: u64,
        multipart: MultipartUploader,
    ) -> Self {
        Self {
            store,
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
            multipart_threshold,
            multipart,
        }
    }

    pub fn from_config(store: Arc<dyn ObjectStore>, config: &SyncConfig) -> Self {
        let multipart = MultipartUploader::from_config(store.clone(), config);
        Self::new(
            store,
            config.upload_workers,
            config.queue_capacity,
            config.multipart_threshold,
            multipart,
        )
    }

    /// Upload every task and wait for all of them.
    pub fn dispatch<I>(&self, tasks: I) -> SyncOutcome
    where
        I: IntoIterator<Item = UploadTask>,
    {
        self.dispatch_pipeline(tasks.into_iter().map(Ok))
    }

    /// Upload every `Ok` task; `Err` items are recorded as failures
    /// without reaching the queue.
    ///
    /// The producer runs on the calling thread and blocks while the queue
    /// is full. Returns once the queue is drained and every worker joined.
    pub fn dispatch_pipeline<I>(&self, items: I) -> SyncOutcome
    where
        I: IntoIterator<Item = std::result::Result<UploadTask, FileFailure>>,
    {
        let outcome = Mutex::new(SyncOutcome::default());
        let (sender, receiver) = bounded::<UploadTask>(self.queue_capacity);

        thread::scope(|scope| {
            for worker in 0..self.workers {
                let receiver = receiver.clone();
                let outcome = &outcome;
                scope.spawn(move || self.run_worker(worker, receiver, outcome));
            }
            drop(receiver);

            for item in items {
                match item {
                    Ok(task) => {
                        // Only fails once every worker is gone.
                        if sender.send(task).is_err() {
                            break;
                        }
                    }
                    Err(failure) => {
                        warn!(key = %failure.key, error = %failure.error, "skipping file");
                        lock(&outcome).record_failure(failure);
                    }
                }
            }
            drop(sender);
        });

        outcome.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_worker(&self, worker: usize, receiver: Receiver<UploadTask>, outcome: &Mutex<SyncOutcome>) {
        debug!(worker, "upload worker started");
        for task in receiver.iter() {
            match self.upload(&task) {
                Ok(bytes) => {
                    info!(worker, key = %task.key, bytes, "uploaded");
                    lock(outcome).record_success(bytes);
                }
                Err(error) => {
                    warn!(worker, key = %task.key, error = %error, "upload failed");
                    lock(outcome).record_failure(FileFailure::new(task.key, error));
                }
            }
        }
        debug!(worker, "upload worker finished");
    }

    /// Upload one task. Returns the bytes transferred.
    fn upload(&self, task: &UploadTask) -> Result<u64> {
        let mut file = File::open(&task.absolute_path).map_err(|e| SyncError::Upload {
            key: task.key.clone(),
            source: StoreError::Io(e),
        })?;

        if task.size > self.multipart_threshold {
            return self.multipart.upload_large(&task.key, &mut file, task.size);
        }

        self.store
            .put(&task.key, &mut file, task.size)
            .map_err(|source| SyncError::Upload {
                key: task.key.clone(),
                source,
            })?;
        Ok(task.size)
    }
}

fn lock(outcome: &Mutex<SyncOutcome>) -> std::sync::MutexGuard<'_, SyncOutcome> {
    outcome.lock().unwrap_or_else(PoisonError::into_inner)
}
