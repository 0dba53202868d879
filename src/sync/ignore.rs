//! Ignore pattern matching for uploads.
//!
//! Patterns are literal strings, not globs: `node_modules/` only matches a
//! key that is exactly `node_modules/`, and `*.log` only matches a file
//! literally named `*.log`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use crate::error::{Result, SyncError};

/// Name of the ignore file looked up in the sync root.
pub const IGNORE_FILE_NAME: &str = ".syncignore";

/// Literal pattern matcher.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    /// Patterns in load order, without duplicates.
    patterns: Vec<String>,
    lookup: HashSet<String>,
    /// Also compare the final path component.
    match_file_names: bool,
}

impl IgnoreMatcher {
    /// Create a matcher from patterns, always adding the running
    /// executable's file name so the tool never uploads itself.
    pub fn new<I, S>(patterns: I, match_file_names: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut matcher = Self::from_patterns(patterns, match_file_names);
        if let Some(name) = current_exe_name() {
            matcher.add_pattern(name);
        }
        matcher
    }

    /// Create a matcher holding exactly `patterns`.
    pub fn from_patterns<I, S>(patterns: I, match_file_names: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut matcher = Self {
            patterns: Vec::new(),
            lookup: HashSet::new(),
            match_file_names,
        };
        for pattern in patterns {
            matcher.add_pattern(pattern);
        }
        matcher
    }

    fn add_pattern(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if self.lookup.insert(pattern.clone()) {
            self.patterns.push(pattern);
        }
    }

    /// Check whether a slash-separated relative key is ignored.
    pub fn matches(&self, key: &str) -> bool {
        if self.lookup.contains(key) {
            return true;
        }

        if self.match_file_names {
            if let Some(file_name) = key.rsplit('/').next() {
                return self.lookup.contains(file_name);
            }
        }

        false
    }

    /// Patterns in load order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn match_file_names(&self) -> bool {
        self.match_file_names
    }
}

/// Parse ignore file content: one pattern per line, blank lines and
/// `#` comments skipped.
pub fn parse_ignore_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Load `<root>/.syncignore`. A missing file yields no patterns.
pub fn load_ignore_file(root: &Path) -> Result<Vec<String>> {
    let path = root.join(IGNORE_FILE_NAME);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let patterns = parse_ignore_lines(&content);
            info!(path = %path.display(), count = patterns.len(), "loaded ignore patterns");
            Ok(patterns)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no ignore file found, proceeding without ignoring files");
            Ok(Vec::new())
        }
        Err(e) => Err(SyncError::Config(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn current_exe_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
