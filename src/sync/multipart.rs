//! Large-file multipart uploads.
//!
//! Splits a body into fixed-size parts and uploads them with a bounded
//! number of parts in flight. A failed part discards every part already
//! uploaded for the object, so no partial object is ever left behind.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::store::{expect_eof, ObjectStore, StoreError, StoreResult};

/// Maximum number of parts a single object may be split into.
pub const MAX_UPLOAD_PARTS: u64 = 10_000;

/// How an object of a given size is cut into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    size: u64,
    part_size: u64,
}

impl PartPlan {
    /// Plan parts of `part_size` bytes, growing the part size when the
    /// object would otherwise need more than [`MAX_UPLOAD_PARTS`] parts.
    pub fn new(size: u64, part_size: u64) -> Self {
        let mut part_size = part_size.max(1);
        if size.div_ceil(part_size) > MAX_UPLOAD_PARTS {
            part_size = size.div_ceil(MAX_UPLOAD_PARTS);
        }
        Self { size, part_size }
    }

    /// Total object size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size of every part except possibly the last.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Number of parts.
    pub fn part_count(&self) -> u32 {
        self.size.div_ceil(self.part_size) as u32
    }

    /// Length of part `number` (1-based).
    pub fn part_len(&self, number: u32) -> u64 {
        let offset = u64::from(number.saturating_sub(1)) * self.part_size;
        self.size.saturating_sub(offset).min(self.part_size)
    }
}

/// Part-level primitives of a started multipart upload.
pub trait MultipartSession: Sync {
    /// Upload part `number` (1-based). Parts may arrive out of order.
    fn upload_part(&self, number: u32, data: Vec<u8>) -> StoreResult<()>;

    /// Compose the uploaded parts into the final object.
    fn complete(&self) -> StoreResult<()>;

    /// Discard every uploaded part.
    fn abort(&self) -> StoreResult<()>;
}

/// Read `body` part by part and upload through `session` with at most
/// `concurrency` parts in flight.
///
/// Parts are read on the calling thread and handed over a rendezvous
/// channel, so a new part is only read once a part thread is free. On
/// the first failure no further part is read, in-flight parts finish,
/// and the session is aborted. A body longer than the plan also aborts.
pub fn upload_parts(
    key: &str,
    session: &dyn MultipartSession,
    body: &mut dyn Read,
    plan: &PartPlan,
    concurrency: usize,
) -> StoreResult<u64> {
    let concurrency = concurrency.max(1);
    let failed = AtomicBool::new(false);
    let failure: Mutex<Option<(u32, StoreError)>> = Mutex::new(None);

    let record = |part: u32, error: StoreError| {
        let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some((part, error));
        }
        failed.store(true, Ordering::Release);
    };

    let (sender, receiver) = bounded::<(u32, Vec<u8>)>(0);

    thread::scope(|scope| {
        for _ in 0..concurrency {
            let receiver = receiver.clone();
            let record = &record;
            let failed = &failed;
            scope.spawn(move || {
                for (number, data) in receiver.iter() {
                    if failed.load(Ordering::Acquire) {
                        continue;
                    }
                    let len = data.len();
                    match session.upload_part(number, data) {
                        Ok(()) => debug!(key, part = number, bytes = len, "part uploaded"),
                        Err(e) => {
                            warn!(key, part = number, error = %e, "part upload failed");
                            record(number, e);
                        }
                    }
                }
            });
        }
        drop(receiver);

        for number in 1..=plan.part_count() {
            if failed.load(Ordering::Acquire) {
                break;
            }
            let mut data = vec![0u8; plan.part_len(number) as usize];
            if let Err(e) = body.read_exact(&mut data) {
                record(number, StoreError::Io(e));
                break;
            }
            if sender.send((number, data)).is_err() {
                break;
            }
        }
        if !failed.load(Ordering::Acquire) {
            if let Err(e) = expect_eof(body) {
                record(plan.part_count(), StoreError::Io(e));
            }
        }
        drop(sender);
    });

    let failure = failure
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);

    match failure {
        None => match session.complete() {
            Ok(()) => Ok(plan.size()),
            Err(e) => {
                abort_quietly(key, session);
                Err(e)
            }
        },
        Some((part, source)) => {
            abort_quietly(key, session);
            Err(StoreError::MultipartAborted {
                key: key.to_string(),
                part,
                source: Box::new(source),
            })
        }
    }
}

fn abort_quietly(key: &str, session: &dyn MultipartSession) {
    if let Err(e) = session.abort() {
        warn!(key, error = %e, "failed to abort multipart upload");
    }
}

/// Uploads files above the multipart threshold.
pub struct MultipartUploader {
    store: Arc<dyn ObjectStore>,
    part_size: u64,
    part_concurrency: usize,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn ObjectStore>, part_size: u64, part_concurrency: usize) -> Self {
        Self {
            store,
            part_size,
            part_concurrency: part_concurrency.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn ObjectStore>, config: &SyncConfig) -> Self {
        Self::new(store, config.part_size, config.part_concurrency)
    }

    /// Part plan for an object of `size` bytes.
    pub fn plan(&self, size: u64) -> PartPlan {
        PartPlan::new(size, self.part_size)
    }

    /// Upload `file` as `key` in parts. Returns the bytes transferred.
    pub fn upload_large(&self, key: &str, file: &mut File, size: u64) -> Result<u64> {
        let upload_error = |source: StoreError| SyncError::Upload {
            key: key.to_string(),
            source,
        };

        file.seek(SeekFrom::Start(0))
            .map_err(|e| upload_error(StoreError::Io(e)))?;

        let plan = self.plan(size);
        info!(
            key,
            size,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "using multipart upload"
        );

        self.store
            .multipart_put(key, file, &plan, self.part_concurrency)
            .map_err(upload_error)?;

        Ok(size)
    }
}
