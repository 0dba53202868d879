//! Content hashing for change detection.
//!
//! Single-part S3 entity tags are the MD5 of the object, so local files
//! are hashed with MD5 and rendered as lowercase hex.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

/// Computes a content fingerprint comparable to a remote entity tag.
pub trait ContentHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> io::Result<String>;
}

/// Streaming MD5 hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl ContentHasher for Md5Hasher {
    fn hash_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Md5::new();
        let mut buffer = [0u8; 65536]; // 64KB buffer

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// MD5 of an in-memory buffer as lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}
