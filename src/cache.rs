//! Read-through file cache for vendor API responses
//!
//! One file per request, named by the SHA-256 digest of the request URL with
//! its query parameters sorted. The file holds the raw response body.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ComplianceError;

/// File cache rooted at one directory
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache key for a request: `sha256(endpoint?k1=v1&k2=v2)` with keys sorted.
    pub fn cache_key(endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort();
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(sorted)
            .finish();
        sha256_hex(format!("{endpoint}?{query}").as_bytes())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Cached body for a key, if present
    pub fn get(&self, key: &str) -> Result<Option<String>, ComplianceError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(body) => {
                debug!(key, "cache hit");
                Ok(Some(body))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a body under a key; the file appears atomically.
    pub fn put(&self, key: &str, body: &str) -> Result<(), ComplianceError> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        let tmp = self
            .root
            .join(format!(".{key}.tmp.{}", uuid::Uuid::new_v4().simple()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(key, "cache stored");
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
