//! S3 and S3-compatible storage backend using OpenDAL.
//!
//! OpenDAL is async; the sync engine is thread based. Every call is run
//! to completion with [`Handle::block_on`] from the calling worker thread,
//! which must not itself be a runtime thread.

use std::future::IntoFuture;
use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opendal::layers::{RetryLayer, TimeoutLayer};
use opendal::{services::S3, ErrorKind, Operator, Writer};
use tokio::runtime::Handle;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::store::{
    expect_eof, normalize_etag, read_full, ObjectStore, RemoteMeta, StoreError, StoreResult,
};
use crate::sync::multipart::PartPlan;

/// Retries per request before a failure is reported.
const MAX_RETRIES: usize = 10;
/// Timeout for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Bytes buffered per request when streaming a single-shot upload.
/// Bodies up to this size go out as one PUT; larger ones are sent in
/// chunks of this size and get a multipart entity tag.
const STREAM_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// S3 bucket accessed through OpenDAL.
pub struct S3Store {
    operator: Operator,
    runtime: Handle,
    bucket: String,
}

impl S3Store {
    /// Create a store for `config.bucket`.
    ///
    /// Credentials come from the standard AWS chain (environment, shared
    /// credentials file, instance profile). `config.endpoint` selects an
    /// S3-compatible provider.
    pub fn new(config: &SyncConfig, runtime: Handle) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(SyncError::Config("bucket must not be empty".to_string()));
        }

        let mut builder = S3::default().bucket(&config.bucket).region(&config.region);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)
            .map_err(|e| SyncError::Config(format!("failed to configure S3 backend: {e}")))?
            .layer(TimeoutLayer::new().with_timeout(REQUEST_TIMEOUT))
            .layer(RetryLayer::new().with_max_times(MAX_RETRIES).with_jitter())
            .finish();

        Ok(Self {
            operator,
            runtime,
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn block_on<F: IntoFuture>(&self, future: F) -> F::Output {
        self.runtime.block_on(future.into_future())
    }
}

impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    fn head(&self, key: &str) -> StoreResult<RemoteMeta> {
        let meta = self.block_on(self.operator.stat(key)).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::request("head", key, e)
            }
        })?;

        Ok(RemoteMeta {
            key: key.to_string(),
            size: meta.content_length(),
            // Timestamps render as RFC 3339.
            last_modified: meta
                .last_modified()
                .and_then(|ts| ts.to_string().parse::<DateTime<Utc>>().ok()),
            etag: meta.etag().map(normalize_etag).unwrap_or_default(),
        })
    }

    fn put(&self, key: &str, body: &mut dyn Read, size: u64) -> StoreResult<()> {
        self.block_on(async {
            let mut writer = self
                .operator
                .writer_with(key)
                .chunk(STREAM_CHUNK_SIZE)
                .await
                .map_err(|e| StoreError::request("put", key, e))?;

            let mut buf = vec![0u8; (size as usize).clamp(1, STREAM_CHUNK_SIZE)];
            loop {
                let read = match read_full(body, &mut buf) {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(e) => {
                        abort_quietly(key, &mut writer).await;
                        return Err(StoreError::Io(e));
                    }
                };
                if let Err(e) = writer.write(buf[..read].to_vec()).await {
                    abort_quietly(key, &mut writer).await;
                    return Err(StoreError::request("put", key, e));
                }
            }

            if let Err(e) = writer.close().await {
                abort_quietly(key, &mut writer).await;
                return Err(StoreError::request("put", key, e));
            }
            Ok(())
        })
    }

    fn multipart_put(
        &self,
        key: &str,
        body: &mut dyn Read,
        plan: &PartPlan,
        concurrency: usize,
    ) -> StoreResult<()> {
        self.block_on(async {
            // The writer cuts the stream into parts and keeps up to
            // `concurrency` of them in flight.
            let mut writer = self
                .operator
                .writer_with(key)
                .chunk(plan.part_size() as usize)
                .concurrent(concurrency)
                .await
                .map_err(|e| StoreError::request("multipart_put", key, e))?;

            for number in 1..=plan.part_count() {
                let mut part = vec![0u8; plan.part_len(number) as usize];
                let written = match body.read_exact(&mut part) {
                    Ok(()) => writer
                        .write(part)
                        .await
                        .map_err(|e| StoreError::request("upload_part", key, e)),
                    Err(e) => Err(StoreError::Io(e)),
                };

                if let Err(source) = written {
                    abort_quietly(key, &mut writer).await;
                    return Err(StoreError::MultipartAborted {
                        key: key.to_string(),
                        part: number,
                        source: Box::new(source),
                    });
                }
            }

            if let Err(e) = expect_eof(body) {
                abort_quietly(key, &mut writer).await;
                return Err(StoreError::MultipartAborted {
                    key: key.to_string(),
                    part: plan.part_count(),
                    source: Box::new(StoreError::Io(e)),
                });
            }

            if let Err(e) = writer.close().await {
                abort_quietly(key, &mut writer).await;
                return Err(StoreError::request("complete_multipart", key, e));
            }
            Ok(())
        })
    }

    fn list_all(&self, prefix: &str) -> StoreResult<Vec<String>> {
        // The lister follows continuation tokens until every page is read.
        let entries = self
            .block_on(self.operator.list_with(prefix).recursive(true))
            .map_err(|e| StoreError::request("list", prefix, e))?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.path().to_string())
            .collect())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.block_on(self.operator.delete(key))
            .map_err(|e| StoreError::request("delete", key, e))
    }
}

async fn abort_quietly(key: &str, writer: &mut Writer) {
    if let Err(e) = writer.abort().await {
        warn!(key, error = %e, "failed to abort upload");
    }
}
