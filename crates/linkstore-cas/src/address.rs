//! Hash to block-store path mapping.
//!
//! ```text
//! ba7816bf...f20015ad  ->  /xo-block-store/ba78/16bf/.../f200/15ad.source
//! ```
//!
//! Nesting depends only on the digits of the hash, so every process computes
//! the same path for the same content and each level holds at most 16^4
//! entries.

/// Characters per directory level.
pub const SHARD_WIDTH: usize = 4;

/// Suffix of blob files.
pub const SOURCE_SUFFIX: &str = ".source";

/// Maps content hashes to logical keys under the block-store root.
#[derive(Debug, Clone)]
pub struct AddressMapper {
    root: String,
}

impl AddressMapper {
    /// `root` is a logical backend key such as `/xo-block-store`.
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        let root = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Key of the blob holding content with this hash.
    ///
    /// # Panics
    ///
    /// If the hash length is not a multiple of [`SHARD_WIDTH`].
    pub fn path_for(&self, hash: &str) -> String {
        assert_eq!(
            hash.len() % SHARD_WIDTH,
            0,
            "hash length must be a multiple of {SHARD_WIDTH}: {hash:?}"
        );
        let mut path = String::with_capacity(self.root.len() + hash.len() * 5 / 4 + 8);
        path.push_str(&self.root);
        for (i, c) in hash.chars().enumerate() {
            if i % SHARD_WIDTH == 0 {
                path.push('/');
            }
            path.push(c);
        }
        path.push_str(SOURCE_SUFFIX);
        path
    }

    /// Inverse of [`path_for`](Self::path_for) for keys inside the store.
    ///
    /// Returns `None` for keys outside the root, for directories and for
    /// anything that does not follow the shard layout.
    pub fn hash_for(&self, key: &str) -> Option<String> {
        let rel = key.strip_prefix(&self.root)?.strip_prefix('/')?;
        let rel = rel.strip_suffix(SOURCE_SUFFIX)?;
        let mut hash = String::with_capacity(rel.len());
        for segment in rel.split('/') {
            if segment.len() != SHARD_WIDTH {
                return None;
            }
            hash.push_str(segment);
        }
        Some(hash)
    }

    /// Whether `key` is the store root itself.
    pub fn is_root(&self, key: &str) -> bool {
        let normalized = key.trim_end_matches('/');
        normalized == self.root || normalized == self.root.trim_start_matches('/')
    }

    /// Whether `key` is the store root or lies below it.
    ///
    /// Compares whole path segments, so `/xo-block-store2` is outside
    /// `/xo-block-store`. Keys with `..` are never inside.
    pub fn contains(&self, key: &str) -> bool {
        let segments = |s: &str| {
            s.split('/')
                .filter(|seg| !seg.is_empty() && *seg != ".")
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        let key = segments(key);
        if key.iter().any(|seg| seg == "..") {
            return false;
        }
        key.starts_with(&segments(&self.root))
    }
}
