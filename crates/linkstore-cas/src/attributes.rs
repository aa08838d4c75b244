//! Extended attribute access.
//!
//! The block store keeps exactly one attribute per blob: the hex digest under
//! `user.hash.<algorithm>`. Hard links share the inode, so every
//! caller-visible file carries the attribute of the blob it points to.
//!
//! Neither operation checks for existence first. A path that disappeared in
//! between (typically removed by a concurrent collector) surfaces as
//! [`CasError::NotFound`] straight from the system call.

use std::path::Path;

use crate::{CasError, Result};

/// Get/set a single named string attribute on a path.
pub trait AttributeStore: Send + Sync {
    /// Read attribute `name` of `path`.
    ///
    /// `NotFound` if either the path or the attribute does not exist.
    fn get(&self, path: &Path, name: &str) -> Result<String>;

    /// Set attribute `name` of `path` to `value`.
    ///
    /// `NotFound` if the path does not exist anymore.
    fn set(&self, path: &Path, name: &str, value: &str) -> Result<()>;

    /// Whether the platform offers the mechanism at all.
    fn is_supported(&self) -> bool;

    /// Name of this implementation (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Native extended attributes through `getxattr(2)`/`setxattr(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XattrStore;

impl AttributeStore for XattrStore {
    fn get(&self, path: &Path, name: &str) -> Result<String> {
        if !xattr::SUPPORTED_PLATFORM {
            return Err(CasError::Unsupported("extended attributes".into()));
        }
        match xattr::get(path, name) {
            Ok(Some(value)) => String::from_utf8(value).map_err(|_| {
                CasError::InvalidKey(format!("{name} on {} is not UTF-8", path.display()))
            }),
            Ok(None) => Err(CasError::NotFound {
                path: format!("{}#{name}", path.display()),
            }),
            Err(e) => Err(CasError::from_io(path, e)),
        }
    }

    fn set(&self, path: &Path, name: &str, value: &str) -> Result<()> {
        if !xattr::SUPPORTED_PLATFORM {
            return Err(CasError::Unsupported("extended attributes".into()));
        }
        xattr::set(path, name, value.as_bytes()).map_err(|e| CasError::from_io(path, e))
    }

    fn is_supported(&self) -> bool {
        xattr::SUPPORTED_PLATFORM
    }

    fn name(&self) -> &'static str {
        "xattr"
    }
}

/// Stand-in for filesystems without extended attributes.
///
/// Every call reports `Unsupported`, which turns deduplication off at probe
/// time and makes deletes fall back to plain unlinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttributes;

impl AttributeStore for NoAttributes {
    fn get(&self, _path: &Path, name: &str) -> Result<String> {
        Err(CasError::Unsupported(format!("attribute {name}")))
    }

    fn set(&self, _path: &Path, name: &str, _value: &str) -> Result<()> {
        Err(CasError::Unsupported(format!("attribute {name}")))
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
