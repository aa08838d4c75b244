//! # Garbage Collection
//!
//! Out-of-band sweep of the block store.
//!
//! The delete path reclaims blobs opportunistically, but it cannot see files
//! removed behind its back, and shard directories are never pruned on the hot
//! path. The collector walks the store and
//!
//! 1. removes blobs whose link count is 1 (no caller-visible file left),
//! 2. removes directories that are empty once their orphans are gone.
//!
//! Blobs still linked from elsewhere and their directories are left alone:
//! a directory is only ever removed with `rmdir(2)`, which refuses non-empty
//! directories, so a referenced blob can never be swept along with its shard.
//! The store root itself is kept so writers never need to re-sync.

use std::os::unix::fs::MetadataExt;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::attributes::AttributeStore;
use crate::backend::StorageBackend;
use crate::store::DedupStore;
use crate::{CasError, Result};

/// Outcome of a collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Orphaned blobs removed
    pub blobs_removed: u64,
    /// Bytes held by the removed blobs
    pub bytes_reclaimed: u64,
    /// Blobs still referenced by at least one caller-visible file
    pub blobs_kept: u64,
    /// Empty shard directories removed
    pub directories_removed: u64,
}

impl GcReport {
    fn merge(self, other: GcReport) -> GcReport {
        GcReport {
            blobs_removed: self.blobs_removed + other.blobs_removed,
            bytes_reclaimed: self.bytes_reclaimed + other.bytes_reclaimed,
            blobs_kept: self.blobs_kept + other.blobs_kept,
            directories_removed: self.directories_removed + other.directories_removed,
        }
    }
}

impl<B: StorageBackend, A: AttributeStore> DedupStore<B, A> {
    /// Sweep `dir` (the whole store by default).
    ///
    /// Safe to run while writers are active: a blob that loses the race
    /// between creation and linking is recreated by its writer.
    ///
    /// `dir` must be the store root or a directory below it. Anywhere else a
    /// link count of 1 is an ordinary caller file, so other keys are refused
    /// with [`CasError::InvalidKey`].
    #[instrument(skip(self), level = "debug")]
    pub fn collect_garbage(&self, dir: Option<&str>) -> Result<GcReport> {
        let dir = dir.unwrap_or(self.mapper.root());
        if !self.mapper.contains(dir) {
            return Err(CasError::InvalidKey(format!(
                "{dir:?} is outside the block store {}",
                self.mapper.root()
            )));
        }
        let report = self.sweep_dir(dir)?;
        info!(
            blobs_removed = report.blobs_removed,
            bytes_reclaimed = report.bytes_reclaimed,
            blobs_kept = report.blobs_kept,
            directories_removed = report.directories_removed,
            "garbage collection finished"
        );
        Ok(report)
    }

    fn sweep_dir(&self, dir: &str) -> Result<GcReport> {
        let keep_dir = self.mapper.is_root(dir);

        // Fast path: an empty directory needs no listing.
        if !keep_dir {
            match self.backend.rmdir(dir) {
                Ok(()) => {
                    return Ok(GcReport {
                        directories_removed: 1,
                        ..GcReport::default()
                    })
                }
                Err(e) if e.is_not_found() => return Ok(GcReport::default()),
                Err(e) if e.is_dir_not_empty() => {}
                Err(e) => return Err(e),
            }
        }

        let entries = match self.backend.list(dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(GcReport::default()),
            Err(e) => return Err(e),
        };

        let sweep = |name: &String| self.sweep_entry(&format!("{}/{}", dir.trim_end_matches('/'), name));
        let mut report = if self.options.parallel_gc {
            entries
                .par_iter()
                .map(sweep)
                .try_reduce(GcReport::default, |a, b| Ok(a.merge(b)))?
        } else {
            entries
                .iter()
                .map(sweep)
                .try_fold(GcReport::default(), |acc, r| r.map(|r| acc.merge(r)))?
        };

        if !keep_dir {
            match self.backend.rmdir(dir) {
                Ok(()) => report.directories_removed += 1,
                // Still holds referenced blobs, or a writer just added one.
                Err(e) if e.is_dir_not_empty() || e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    fn sweep_entry(&self, key: &str) -> Result<GcReport> {
        let meta = match self.stat(key) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(GcReport::default()),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            return self.sweep_dir(key);
        }
        if meta.nlink() != 1 {
            return Ok(GcReport {
                blobs_kept: 1,
                ..GcReport::default()
            });
        }
        match self.backend.delete(key) {
            Ok(()) => {
                debug!(key, "removed orphaned blob");
                Ok(GcReport {
                    blobs_removed: 1,
                    bytes_reclaimed: meta.len(),
                    ..GcReport::default()
                })
            }
            Err(e) if e.is_not_found() => Ok(GcReport::default()),
            Err(e) => Err(e),
        }
    }
}
