//! Sync configuration.
//!
//! One immutable value built at startup (TOML file, then command line
//! overrides) and handed to every component.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::sync::ignore::{load_ignore_file, IgnoreMatcher};

pub const MIB: u64 = 1024 * 1024;

pub const DEFAULT_UPLOAD_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Files larger than this use multipart upload.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * MIB;
/// Larger parts mean fewer requests per object.
pub const DEFAULT_PART_SIZE: u64 = 50 * MIB;
pub const DEFAULT_PART_CONCURRENCY: usize = 3;
pub const DEFAULT_REGION: &str = "us-east-1";

/// Upper bound for `upload_workers * part_concurrency`.
pub const MAX_IN_FLIGHT_PARTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local directory mirrored to the bucket.
    pub root: PathBuf,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers.
    pub endpoint: Option<String>,
    pub upload_workers: usize,
    pub queue_capacity: usize,
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub part_concurrency: usize,
    pub ignore_patterns: Vec<String>,
    /// Also match ignore patterns against the bare file name.
    pub match_file_names: bool,
    /// Read `.syncignore` from the root.
    pub use_ignore_file: bool,
    /// Seconds between cycles; `None` runs a single cycle.
    pub interval_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bucket: String::new(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
            ignore_patterns: Vec::new(),
            match_file_names: false,
            use_ignore_file: true,
            interval_secs: None,
        }
    }
}

impl SyncConfig {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// `<config dir>/bucketsync/config.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bucketsync").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("upload_workers", self.upload_workers as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("part_concurrency", self.part_concurrency as u64),
            ("part_size", self.part_size),
            ("multipart_threshold", self.multipart_threshold),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SyncError::Config(format!("{name} must be greater than zero")));
            }
        }

        let in_flight = self.upload_workers.saturating_mul(self.part_concurrency);
        if in_flight > MAX_IN_FLIGHT_PARTS {
            return Err(SyncError::Config(format!(
                "upload_workers * part_concurrency = {in_flight} exceeds the limit of {MAX_IN_FLIGHT_PARTS} parts in flight"
            )));
        }

        if self.interval_secs == Some(0) {
            return Err(SyncError::Config("interval_secs must be greater than zero".to_string()));
        }

        Ok(())
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }

    /// Build the ignore matcher from configured patterns plus the
    /// ignore file, when enabled.
    pub fn ignore_matcher(&self) -> Result<IgnoreMatcher> {
        let mut patterns = self.ignore_patterns.clone();
        if self.use_ignore_file {
            patterns.extend(load_ignore_file(&self.root)?);
        }
        Ok(IgnoreMatcher::new(patterns, self.match_file_names))
    }
}
