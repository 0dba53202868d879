//! In-memory object store for testing.
//!
//! Behaves like a single-region S3 bucket: entity tags are the MD5 of
//! the content for single-shot uploads and `<md5 of part md5s>-<n>` for
//! multipart uploads. All data is lost on drop.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

use crate::store::{ObjectStore, RemoteMeta, StoreError, StoreResult};
use crate::sync::hash::md5_hex;
use crate::sync::multipart::{upload_parts, MultipartSession, PartPlan};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: Option<DateTime<Utc>>,
    etag: String,
}

/// Statistics of the last multipart upload of a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultipartRecord {
    pub parts: u32,
    pub peak_in_flight: usize,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    multipart: Mutex<HashMap<String, MultipartRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object with explicit metadata.
    pub fn insert_object(
        &self,
        key: &str,
        data: Vec<u8>,
        last_modified: Option<DateTime<Utc>>,
        etag: &str,
    ) {
        self.write().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified,
                etag: etag.to_string(),
            },
        );
    }

    /// Content of an object, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read().get(key).map(|object| object.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// All keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Statistics of the last multipart upload of `key`.
    pub fn multipart_record(&self, key: &str) -> Option<MultipartRecord> {
        self.multipart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn head(&self, key: &str) -> StoreResult<RemoteMeta> {
        self.read()
            .get(key)
            .map(|object| RemoteMeta {
                key: key.to_string(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
                etag: object.etag.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, body: &mut dyn Read, size: u64) -> StoreResult<()> {
        let mut data = Vec::with_capacity(size as usize);
        body.read_to_end(&mut data)?;
        let etag = md5_hex(&data);
        self.insert_object(key, data, Some(Utc::now()), &etag);
        Ok(())
    }

    fn multipart_put(
        &self,
        key: &str,
        body: &mut dyn Read,
        plan: &PartPlan,
        concurrency: usize,
    ) -> StoreResult<()> {
        let session = MemoryMultipart::default();
        upload_parts(key, &session, body, plan, concurrency)?;

        let parts = session.take_parts();
        let mut composite = Md5::new();
        let mut data = Vec::with_capacity(plan.size() as usize);
        for part in parts.values() {
            composite.update(Md5::digest(part));
            data.extend_from_slice(part);
        }
        let etag = format!("{:x}-{}", composite.finalize(), parts.len());

        self.insert_object(key, data, Some(Utc::now()), &etag);
        self.multipart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                MultipartRecord {
                    parts: parts.len() as u32,
                    peak_in_flight: session.peak.load(Ordering::SeqCst),
                },
            );
        Ok(())
    }

    fn list_all(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        // S3 deletes are idempotent
        self.write().remove(key);
        Ok(())
    }
}

/// Parts staged for one multipart upload; invisible until completed.
#[derive(Default)]
struct MemoryMultipart {
    parts: Mutex<BTreeMap<u32, Vec<u8>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryMultipart {
    fn take_parts(&self) -> BTreeMap<u32, Vec<u8>> {
        std::mem::take(&mut *self.parts.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MultipartSession for MemoryMultipart {
    fn upload_part(&self, number: u32, data: Vec<u8>) -> StoreResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(number, data);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn complete(&self) -> StoreResult<()> {
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        self.parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
