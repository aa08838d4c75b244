//! Store statistics and integrity verification.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::attributes::AttributeStore;
use crate::backend::StorageBackend;
use crate::store::DedupStore;
use crate::{CasError, Result};

/// Statistics about the block store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of blobs stored
    pub blob_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
    /// Blobs linked by at least one caller-visible file
    pub shared_blobs: u64,
    /// Blobs nothing links anymore (collector candidates)
    pub orphan_blobs: u64,
    /// Caller-visible links over all blobs
    pub caller_links: u64,
    /// Shard directories below the root
    pub directories: u64,
}

impl StoreStats {
    /// Calculate average blob size
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}

/// A blob whose content no longer matches its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptBlob {
    pub key: String,
    pub expected: String,
    pub actual: String,
}

/// Result of [`DedupStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Blobs re-hashed
    pub checked: u64,
    /// Content does not match the hash in the path
    pub corrupt: Vec<CorruptBlob>,
    /// Attribute missing (creation interrupted, or written by hand)
    pub missing_attribute: Vec<String>,
    /// Attribute present but different from the path hash
    pub wrong_attribute: Vec<String>,
    /// Files in the store that do not follow the shard layout
    pub foreign: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty() && self.wrong_attribute.is_empty()
    }
}

impl<B: StorageBackend, A: AttributeStore> DedupStore<B, A> {
    /// Walk the store and count blobs, bytes and links.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for (_, meta) in self.walk_blobs()? {
            if meta.is_dir() {
                stats.directories += 1;
                continue;
            }
            stats.blob_count += 1;
            stats.total_bytes += meta.len();
            let callers = meta.nlink().saturating_sub(1);
            stats.caller_links += callers;
            if callers == 0 {
                stats.orphan_blobs += 1;
            } else {
                stats.shared_blobs += 1;
            }
        }
        Ok(stats)
    }

    /// Re-hash every blob and check it against its address and attribute.
    #[instrument(skip(self), level = "debug")]
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let root = self.backend.resolve(self.mapper.root())?;
        for (path, meta) in self.walk_blobs()? {
            if meta.is_dir() {
                continue;
            }
            let key = self.key_for(&root, &path);
            let Some(expected) = self.mapper.hash_for(&key) else {
                report.foreign.push(key);
                continue;
            };

            let data = match fs::read(&path) {
                Ok(data) => data,
                // Reclaimed while we were walking.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CasError::from_io(&path, e)),
            };
            report.checked += 1;

            let actual = self.options.hash.digest_hex(&data);
            if actual != expected {
                warn!(%key, %expected, %actual, "corrupt blob");
                report.corrupt.push(CorruptBlob {
                    key: key.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }

            match self.attributes.get(&path, &self.attribute_name) {
                Ok(value) if value == expected => {}
                Ok(_) => report.wrong_attribute.push(key),
                Err(e) if e.is_not_found() || e.is_unsupported() => {
                    report.missing_attribute.push(key)
                }
                Err(e) => return Err(e),
            }
        }
        debug!(checked = report.checked, clean = report.is_clean(), "verify finished");
        Ok(report)
    }

    /// Every entry below the store root, root excluded.
    ///
    /// Entries that vanish under a concurrent collector are skipped.
    fn walk_blobs(&self) -> Result<Vec<(PathBuf, fs::Metadata)>> {
        let root = self.backend.resolve(self.mapper.root())?;
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_vanished(&e) => continue,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    let io = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop in block store"));
                    return Err(CasError::from_io(path, io));
                }
            };
            match entry.metadata() {
                Ok(meta) => entries.push((entry.into_path(), meta)),
                Err(e) if is_vanished(&e) => continue,
                Err(e) => {
                    let path = entry.into_path();
                    let io = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop in block store"));
                    return Err(CasError::from_io(path, io));
                }
            }
        }
        Ok(entries)
    }

    /// Logical key of an on-disk path below the store root.
    fn key_for(&self, root: &Path, path: &Path) -> String {
        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.mapper.root(), rel)
    }
}

fn is_vanished(e: &walkdir::Error) -> bool {
    e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound)
}
