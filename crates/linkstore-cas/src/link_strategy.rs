//! Link Strategy
//!
//! Publishes a blob under a caller-visible name.
//!
//! # Design
//!
//! Only a real hard link is acceptable here: the link count of the blob inode
//! is the reference count, and the extended attribute must travel with the
//! caller-visible file. Reflinks or copies would create a second inode and
//! silently break both, so there is no fallback tier.
//!
//! # Usage
//!
//! ```ignore
//! use linkstore_cas::link_strategy::get_strategy;
//!
//! let strategy = get_strategy();
//! strategy.link_file(source, target)?;
//! ```

use std::fs;
use std::path::Path;

use crate::{CasError, Result};

// ============================================================================
// LinkStrategy Trait
// ============================================================================

/// Creates a second name for an existing blob.
pub trait LinkStrategy: Send + Sync {
    /// Make `target` share the inode of `source`.
    ///
    /// - `AlreadyExists` if `target` is occupied
    /// - `NotFound` if `source` vanished (or the parent of `target` is gone)
    /// - `Unsupported` if the filesystem has no hard links
    fn link_file(&self, source: &Path, target: &Path) -> Result<()>;

    /// Name of this strategy (for logging/debugging)
    fn name(&self) -> &'static str;
}

// ============================================================================
// Hard link
// ============================================================================

/// `link(2)`, nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardLinkStrategy;

impl LinkStrategy for HardLinkStrategy {
    fn link_file(&self, source: &Path, target: &Path) -> Result<()> {
        fs::hard_link(source, target).map_err(|e| match e.raw_os_error() {
            // Filesystem (or mount boundary) without hard links.
            Some(code) if code == libc::EPERM || code == libc::EXDEV => {
                CasError::Unsupported(format!(
                    "hard link {} -> {}: {e}",
                    source.display(),
                    target.display()
                ))
            }
            Some(code) if code == libc::EMLINK => CasError::Unsupported(format!(
                "link count limit reached on {}",
                source.display()
            )),
            _ if e.kind() == std::io::ErrorKind::AlreadyExists => CasError::from_io(target, e),
            _ => CasError::from_io(source, e),
        })
    }

    fn name(&self) -> &'static str {
        "hardlink"
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// Get the platform LinkStrategy
pub fn get_strategy() -> &'static dyn LinkStrategy {
    static STRATEGY: HardLinkStrategy = HardLinkStrategy;
    &STRATEGY
}

// ============================================================================
// Tests
// ============================================================================
