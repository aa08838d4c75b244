//! # linkstore-cas
//!
//! Deduplicating block store layered on top of a plain file backend.
//!
//! Identical content is stored once as a *source* blob inside the block store,
//! and every file a writer asks for becomes a hard link to that blob. The
//! filesystem link count is the reference count: no ledger is kept anywhere.
//!
//! ## Directory Layout
//!
//! ```text
//! <backend root>/
//! ├── backups/vm-1/disk.vhd            # caller-visible file (hard link)
//! └── xo-block-store/
//!     └── ba78/
//!         └── 16bf/
//!             └── ...
//!                 └── 15ad.source      # canonical blob, xattr user.hash.sha256
//! ```
//!
//! The hash is split in groups of four hex digits, one directory level per
//! group, and the last group names the blob file.
//!
//! ## Synchronization
//!
//! Writers never coordinate. Exclusive create decides which writer produces a
//! blob, `link(2)` publishes it, and `stat(2)` after `unlink(2)` decides whether
//! the blob can be reclaimed.

pub mod address;
pub mod attributes;
pub mod backend;
pub mod gc;
pub mod hash;
pub mod link_strategy;
pub mod probe;
pub mod stats;
mod store;

pub use address::AddressMapper;
pub use attributes::{AttributeStore, NoAttributes, XattrStore};
pub use backend::{Capabilities, LocalBackend, StorageBackend, WriteFlags};
pub use gc::GcReport;
pub use hash::HashAlgorithm;
pub use stats::{CorruptBlob, StoreStats, VerifyReport};
pub use store::{DedupStore, WriteOptions};

use std::io;
use std::path::Path;

use thiserror::Error;

/// Default logical root of the block store, relative to the backend root.
pub const DEFAULT_BLOCK_STORE: &str = "/xo-block-store";

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("gave up on {hash} after {attempts} concurrent modifications")]
    RaceRetriesExhausted { hash: String, attempts: u32 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CasError>;

impl CasError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(path: impl AsRef<Path>, err: io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => return CasError::NotFound { path },
            io::ErrorKind::AlreadyExists => return CasError::AlreadyExists { path },
            io::ErrorKind::Unsupported => return CasError::Unsupported(format!("{path}: {err}")),
            _ => {}
        }
        match err.raw_os_error() {
            Some(code) if code == libc::ENOTSUP || code == libc::EOPNOTSUPP => {
                CasError::Unsupported(format!("{path}: {err}"))
            }
            _ => CasError::Io { path, source: err },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CasError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CasError::AlreadyExists { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CasError::Unsupported(_))
    }

    /// `rmdir(2)` on a directory that still has entries.
    ///
    /// POSIX allows either `ENOTEMPTY` or `EEXIST` here.
    pub fn is_dir_not_empty(&self) -> bool {
        match self {
            CasError::Io { source, .. } => matches!(
                source.raw_os_error(),
                Some(code) if code == libc::ENOTEMPTY || code == libc::EEXIST
            ),
            CasError::AlreadyExists { .. } => true,
            _ => false,
        }
    }
}

/// Tunables for a [`DedupStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Logical root of the block store inside the backend.
    pub block_store: String,
    /// Content hash used for addressing and for the attribute name.
    pub hash: HashAlgorithm,
    /// Upper bound on retry-from-scratch loops caused by concurrent writers
    /// or collectors.
    pub race_retries: u32,
    /// Size of the random buffer written by the capability probe.
    pub probe_size: usize,
    /// Sweep directory entries on the rayon pool.
    pub parallel_gc: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            block_store: DEFAULT_BLOCK_STORE.to_string(),
            hash: HashAlgorithm::Sha256,
            race_retries: 16,
            probe_size: 1024 * 1024,
            parallel_gc: true,
        }
    }
}
