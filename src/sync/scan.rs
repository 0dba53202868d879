//! Directory scanning.
//!
//! Walks the local tree with jwalk and yields one [`LocalEntry`] per
//! regular file, including symlinks that resolve to a regular file. The
//! walk is lazy and fail-fast: the first I/O error, including a
//! directory that cannot be read, is yielded and ends the sequence.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use jwalk::{DirEntry, Parallelism, WalkDir};
use tracing::warn;

use crate::error::SyncError;
use crate::sync::ignore::IgnoreMatcher;

/// A local file seen during one walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Relative path with `/` separators.
    pub key: String,
    pub absolute_path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Convert a relative path into an object key, always `/`-separated.
pub fn object_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks a root directory, optionally filtering through an ignore matcher.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    root: PathBuf,
    matcher: Option<&'a IgnoreMatcher>,
}

impl<'a> Scanner<'a> {
    /// Scanner that drops keys matched by `matcher`.
    pub fn new(root: impl Into<PathBuf>, matcher: &'a IgnoreMatcher) -> Self {
        Self {
            root: root.into(),
            matcher: Some(matcher),
        }
    }

    /// Scanner that yields every regular file.
    pub fn unfiltered(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            matcher: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh walk of the tree.
    pub fn scan(&self) -> Scan<'a> {
        let walker = WalkDir::new(&self.root)
            .parallelism(Parallelism::Serial)
            .sort(true)
            .skip_hidden(false) // Don't skip hidden files
            .follow_links(false);

        Scan {
            root: self.root.clone(),
            matcher: self.matcher,
            entries: Box::new(walker.into_iter()),
            done: false,
        }
    }
}

/// Lazy sequence of entries produced by [`Scanner::scan`].
pub struct Scan<'a> {
    root: PathBuf,
    matcher: Option<&'a IgnoreMatcher>,
    entries: Box<dyn Iterator<Item = Result<DirEntry<((), ())>, jwalk::Error>>>,
    done: bool,
}

impl Scan<'_> {
    fn fail(&mut self, path: PathBuf, source: io::Error) -> Option<Result<LocalEntry, SyncError>> {
        self.done = true;
        Some(Err(SyncError::Scan { path, source }))
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<LocalEntry, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let mut entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    return self.fail(path, io::Error::other(e));
                }
            };

            // jwalk reports an unreadable directory on the entry itself.
            if let Some(e) = entry.read_children_error.take() {
                return self.fail(entry.path(), io::Error::other(e));
            }

            // Symlinked directories are not descended into
            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }

            let path = entry.path();
            let relative = match path.strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(e) => return self.fail(path.clone(), io::Error::other(e)),
            };
            let key = object_key(relative);

            if let Some(matcher) = self.matcher {
                if matcher.matches(&key) {
                    continue;
                }
            }

            let metadata = if file_type.is_symlink() {
                match fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => metadata,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping dangling symlink");
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(e) => return self.fail(path, io::Error::other(e)),
                }
            };
            let modified = match metadata.modified() {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => return self.fail(path, e),
            };

            return Some(Ok(LocalEntry {
                key,
                absolute_path: path,
                size: metadata.len(),
                modified,
            }));
        }
    }
}
