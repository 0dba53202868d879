//! Remote object store abstraction.
//!
//! The sync core only needs HEAD, PUT, multipart PUT, LIST and DELETE.
//! All calls are blocking from the caller's point of view: a worker
//! thread waits on the network call until it returns.

pub mod memory;
pub mod s3;

use std::io::{self, Read};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::sync::multipart::PartPlan;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Boxed error coming from a store backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A remote request failed after the transport gave up retrying.
    #[error("{op} {key} failed: {source}")]
    Request {
        op: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    /// A part failed; every uploaded part of the object was discarded.
    #[error("multipart upload of {key} aborted at part {part}: {source}")]
    MultipartAborted {
        key: String,
        part: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// Local I/O while producing a request body.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Wrap a backend error for the given operation and key.
    pub fn request(op: &'static str, key: &str, source: impl Into<BoxError>) -> Self {
        StoreError::Request {
            op,
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag without surrounding quotes.
    pub etag: String,
}

impl RemoteMeta {
    /// Whether the entity tag belongs to a multipart-composed object.
    ///
    /// Such tags look like `"<hex>-<parts>"` and are not a content hash.
    pub fn is_multipart_etag(&self) -> bool {
        self.etag.contains('-')
    }
}

/// Strip the double quotes S3 puts around entity tags.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// Fill `buf` from `body`. Returns fewer bytes than `buf.len()` only at
/// end of input.
pub fn read_full(body: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match body.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fail unless `body` is exhausted.
///
/// A multipart upload reads exactly the planned size; a body that grew
/// since it was planned must not be completed as a truncated object.
pub fn expect_eof(body: &mut dyn Read) -> io::Result<()> {
    let mut extra = [0u8; 1];
    match read_full(body, &mut extra)? {
        0 => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "body is longer than the planned upload size",
        )),
    }
}

/// Blocking object store used by the sync engine.
pub trait ObjectStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch object metadata. Absent keys yield [`StoreError::NotFound`].
    fn head(&self, key: &str) -> StoreResult<RemoteMeta>;

    /// Upload `size` bytes from `body` in one request.
    fn put(&self, key: &str, body: &mut dyn Read, size: u64) -> StoreResult<()>;

    /// Upload a large body in parts following `plan`, with at most
    /// `concurrency` parts in flight. On failure no partial object may
    /// remain.
    fn multipart_put(
        &self,
        key: &str,
        body: &mut dyn Read,
        plan: &PartPlan,
        concurrency: usize,
    ) -> StoreResult<()>;

    /// List every key under `prefix`, consuming all result pages.
    fn list_all(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Delete one object.
    fn delete(&self, key: &str) -> StoreResult<()>;
}
