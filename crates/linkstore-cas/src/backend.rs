//! Plain file storage backend.
//!
//! [`StorageBackend`] is the narrow interface the deduplicating layer needs
//! from whatever it wraps. Keys are `/`-separated logical paths; a leading
//! `/` is allowed and ignored, so `/xo-block-store/ab12` and
//! `xo-block-store/ab12` name the same file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{CasError, Result};

/// Flags for [`StorageBackend::write_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Fail with `AlreadyExists` instead of replacing an existing file.
    pub exclusive: bool,
}

impl WriteFlags {
    pub fn exclusive() -> Self {
        Self { exclusive: true }
    }
}

/// What a backend (and the layers wrapping it) can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `write_file` honours [`WriteFlags::exclusive`] atomically.
    pub exclusive_create: bool,
    /// Non-exclusive writes replace the target atomically.
    pub atomic_replace: bool,
    /// Content deduplication through hard links and extended attributes.
    pub dedup: bool,
}

/// Storage operations consumed by the deduplicating layer.
pub trait StorageBackend: Send + Sync {
    /// Concrete filesystem location of a logical key.
    fn resolve(&self, file: &str) -> Result<PathBuf>;

    /// Write `data` to `file`, creating parent directories.
    fn write_file(&self, file: &str, data: &[u8], flags: WriteFlags) -> Result<()>;

    fn read_file(&self, file: &str) -> Result<Vec<u8>>;

    /// Remove a file. `NotFound` if it does not exist.
    fn delete(&self, file: &str) -> Result<()>;

    /// Create a directory and its parents.
    fn mkdir(&self, dir: &str) -> Result<()>;

    /// Entry names (not paths) of a directory.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Remove an empty directory.
    fn rmdir(&self, dir: &str) -> Result<()>;

    /// Remove a directory and everything below it.
    fn rmtree(&self, dir: &str) -> Result<()>;

    /// Prepare the backend for a session.
    fn sync(&self) -> Result<()>;

    /// Release whatever `sync` acquired.
    fn forget(&self) -> Result<()>;

    fn check_support(&self) -> Capabilities;

    /// Name of this backend (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Storage backend for a local directory using `std::fs` directly.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory path.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        // Canonicalize when possible so resolved paths are stable across
        // symlinked roots.
        let root = if root.exists() {
            fs::canonicalize(&root).map_err(|e| CasError::from_io(&root, e))?
        } else {
            root
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject keys that could escape the root.
    fn validate_key(key: &str) -> Result<&str> {
        let rel = key.trim_start_matches('/');
        if rel.is_empty() {
            return Err(CasError::InvalidKey(format!("empty key {key:?}")));
        }
        if rel.contains('\\') {
            return Err(CasError::InvalidKey(format!("backslash in {key:?}")));
        }
        for component in Path::new(rel).components() {
            if !matches!(component, Component::Normal(_) | Component::CurDir) {
                return Err(CasError::InvalidKey(format!("traversal in {key:?}")));
            }
        }
        Ok(rel)
    }

    fn create_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CasError::from_io(parent, e))?;
        }
        Ok(())
    }

    fn write_exclusive(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.create_parent(path)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| CasError::from_io(path, e))?;
        if let Err(e) = file.write_all(data).and_then(|()| file.sync_all()) {
            // We created it, so a partial file is ours to drop.
            let _ = fs::remove_file(path);
            return Err(CasError::from_io(path, e));
        }
        Ok(())
    }

    /// Temp file in the same directory, then atomic rename into place.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.create_parent(path)?;
        let dir = path.parent().unwrap_or(self.root.as_path());
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CasError::from_io(dir, e))?;
        tmp.write_all(data).map_err(|e| CasError::from_io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| CasError::from_io(path, e.error))?;
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn resolve(&self, file: &str) -> Result<PathBuf> {
        Ok(self.root.join(Self::validate_key(file)?))
    }

    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    fn write_file(&self, file: &str, data: &[u8], flags: WriteFlags) -> Result<()> {
        let path = self.resolve(file)?;
        if flags.exclusive {
            self.write_exclusive(&path, data)
        } else {
            self.write_atomic(&path, data)
        }
    }

    fn read_file(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.resolve(file)?;
        fs::read(&path).map_err(|e| CasError::from_io(&path, e))
    }

    fn delete(&self, file: &str) -> Result<()> {
        let path = self.resolve(file)?;
        fs::remove_file(&path).map_err(|e| CasError::from_io(&path, e))
    }

    fn mkdir(&self, dir: &str) -> Result<()> {
        let path = self.resolve(dir)?;
        fs::create_dir_all(&path).map_err(|e| CasError::from_io(&path, e))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(dir)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&path).map_err(|e| CasError::from_io(&path, e))? {
            let entry = entry.map_err(|e| CasError::from_io(&path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn rmdir(&self, dir: &str) -> Result<()> {
        let path = self.resolve(dir)?;
        fs::remove_dir(&path).map_err(|e| CasError::from_io(&path, e))
    }

    fn rmtree(&self, dir: &str) -> Result<()> {
        let path = self.resolve(dir)?;
        fs::remove_dir_all(&path).map_err(|e| CasError::from_io(&path, e))
    }

    fn sync(&self) -> Result<()> {
        debug!(root = %self.root.display(), "syncing local backend");
        fs::create_dir_all(&self.root).map_err(|e| CasError::from_io(&self.root, e))
    }

    fn forget(&self) -> Result<()> {
        Ok(())
    }

    fn check_support(&self) -> Capabilities {
        Capabilities {
            exclusive_create: true,
            atomic_replace: true,
            dedup: false,
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
