//! The deduplicating layer.
//!
//! [`DedupStore`] wraps a [`StorageBackend`] and intercepts writes and deletes.
//! Everything else is delegated unchanged, so a `DedupStore` is itself a
//! `StorageBackend` and can be handed to code that only knows plain backends.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::address::AddressMapper;
use crate::attributes::{AttributeStore, XattrStore};
use crate::backend::{Capabilities, StorageBackend, WriteFlags};
use crate::link_strategy::{get_strategy, LinkStrategy};
use crate::{CasError, Result, StoreOptions};

/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Store the content once in the block store and hard-link the file to it.
    pub dedup: bool,
    /// Fail with `AlreadyExists` instead of replacing an existing file.
    pub exclusive: bool,
}

impl WriteOptions {
    pub fn dedup() -> Self {
        Self {
            dedup: true,
            exclusive: false,
        }
    }
}

/// Deduplicating wrapper around a plain storage backend.
pub struct DedupStore<B: StorageBackend, A: AttributeStore = XattrStore> {
    pub(crate) backend: B,
    pub(crate) attributes: A,
    pub(crate) linker: &'static dyn LinkStrategy,
    pub(crate) mapper: AddressMapper,
    pub(crate) attribute_name: String,
    pub(crate) options: StoreOptions,
}

impl<B: StorageBackend> DedupStore<B, XattrStore> {
    /// Wrap `backend`, using native extended attributes.
    pub fn new(backend: B, options: StoreOptions) -> Self {
        Self::with_attributes(backend, XattrStore, options)
    }
}

impl<B: StorageBackend, A: AttributeStore> DedupStore<B, A> {
    pub fn with_attributes(backend: B, attributes: A, options: StoreOptions) -> Self {
        Self {
            mapper: AddressMapper::new(options.block_store.clone()),
            attribute_name: options.hash.attribute_name(),
            backend,
            attributes,
            linker: get_strategy(),
            options,
        }
    }

    /// Replace the link strategy (hard link by default).
    pub fn with_link_strategy(mut self, linker: &'static dyn LinkStrategy) -> Self {
        self.linker = linker;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn mapper(&self) -> &AddressMapper {
        &self.mapper
    }

    /// Name of the attribute carrying the digest, e.g. `user.hash.sha256`.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Sync the backend and make sure the block-store root exists.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()?;
        self.backend.mkdir(self.mapper.root())?;
        debug!(
            backend = self.backend.name(),
            attributes = self.attributes.name(),
            linker = self.linker.name(),
            root = self.mapper.root(),
            "block store ready"
        );
        Ok(())
    }

    /// Write `content` to `file`.
    ///
    /// Without `dedup` this is the backend's plain write. With it, the
    /// content is stored once under its hash and `file` becomes a hard link
    /// to that blob. Returns the hash for deduplicated writes.
    #[instrument(skip(self, content), fields(len = content.len()), level = "debug")]
    pub fn write(&self, file: &str, content: &[u8], options: WriteOptions) -> Result<Option<String>> {
        if !options.dedup {
            let flags = WriteFlags {
                exclusive: options.exclusive,
            };
            self.backend.write_file(file, content, flags)?;
            return Ok(None);
        }
        match self.write_deduplicated(file, content, options.exclusive) {
            Ok(hash) => Ok(Some(hash)),
            Err(e) if e.is_unsupported() => {
                warn!(file, error = %e, "deduplication unavailable, writing plain file");
                let flags = WriteFlags {
                    exclusive: options.exclusive,
                };
                self.backend.write_file(file, content, flags)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_deduplicated(&self, file: &str, content: &[u8], exclusive: bool) -> Result<String> {
        let hash = self.options.hash.digest_hex(content);
        let dest = self.backend.resolve(file)?;
        if let Some(parent) = parent_key(file) {
            self.backend.mkdir(parent)?;
        }

        let attempts = self.options.race_retries.max(1);
        for attempt in 1..=attempts {
            let source_key = self.ensure_source(&hash, content)?;
            let source = self.backend.resolve(&source_key)?;
            match self.link(&source, &dest) {
                Ok(()) => return Ok(hash),
                Err(e) if e.is_not_found() => {
                    warn!(%hash, attempt, "blob vanished before it could be linked, recreating");
                }
                Err(e) if e.is_already_exists() => {
                    if exclusive {
                        return Err(e);
                    }
                    if same_inode(&source, &dest)? {
                        debug!(file, "file already links this blob");
                        return Ok(hash);
                    }
                    debug!(file, "replacing existing file");
                    match self.delete(file) {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_unsupported() => {
                    // Nobody else can link it on this filesystem either.
                    self.release_source(&hash)?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(CasError::RaceRetriesExhausted { hash, attempts })
    }

    /// Make sure the blob for `hash` exists, creating it from `content` if
    /// needed. Returns its key.
    ///
    /// Exclusive create decides which of several concurrent writers produces
    /// the blob. Losers return immediately: the winner has already written
    /// the same bytes (or is about to) and sets the attribute itself.
    ///
    /// An existing blob is trusted as-is. A writer that crashed between the
    /// create and the attribute set leaves a blob without attribute, possibly
    /// truncated; [`verify`](Self::verify) reports such blobs and deleting
    /// them lets the next writer recreate them.
    pub fn ensure_source(&self, hash: &str, content: &[u8]) -> Result<String> {
        let key = self.mapper.path_for(hash);
        let attempts = self.options.race_retries.max(1);
        for attempt in 1..=attempts {
            match self.backend.write_file(&key, content, WriteFlags::exclusive()) {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    debug!(%hash, "blob already present");
                    return Ok(key);
                }
                Err(e) if e.is_not_found() => {
                    // A collector pruned the freshly created shard directory.
                    debug!(%hash, attempt, "shard directory vanished, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let path = self.backend.resolve(&key)?;
            match self.attributes.set(&path, &self.attribute_name, hash) {
                Ok(()) => return Ok(key),
                Err(e) if e.is_not_found() => {
                    // Content is gone with it, so start over from creation.
                    warn!(%hash, attempt, "blob deleted by concurrent collector, recreating");
                }
                Err(e) if e.is_unsupported() => {
                    // An unattributed blob could never be released by deletes.
                    match self.backend.delete(&key) {
                        Ok(()) => {}
                        Err(cleanup) if cleanup.is_not_found() => {}
                        Err(cleanup) => {
                            warn!(%hash, error = %cleanup, "could not remove unattributed blob")
                        }
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(CasError::RaceRetriesExhausted {
            hash: hash.to_string(),
            attempts,
        })
    }

    /// Hard-link `source` to `dest`.
    pub fn link(&self, source: &Path, dest: &Path) -> Result<()> {
        self.linker.link_file(source, dest)
    }

    /// Read a file through the backend.
    pub fn read(&self, file: &str) -> Result<Vec<u8>> {
        self.backend.read_file(file)
    }

    /// Read a blob by hash and check its content against the hash.
    pub fn read_source(&self, hash: &str) -> Result<Vec<u8>> {
        let data = self.backend.read_file(&self.mapper.path_for(hash))?;
        let actual = self.options.hash.digest_hex(&data);
        if actual != hash {
            return Err(CasError::HashMismatch {
                expected: hash.to_string(),
                actual,
            });
        }
        Ok(data)
    }

    /// Delete `file`, reclaiming its blob when this was the last reference.
    ///
    /// The attribute must be read before the unlink (afterwards nothing
    /// points at the blob anymore) and the link count after it (so the count
    /// no longer includes `file`).
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, file: &str) -> Result<()> {
        let hash = self.read_hash(file);

        self.backend.delete(file)?;

        if let Some(hash) = hash {
            self.release_source(&hash)?;
        }
        Ok(())
    }

    /// Hash recorded on `file`, if it is a deduplicated file.
    fn read_hash(&self, file: &str) -> Option<String> {
        let path = self.backend.resolve(file).ok()?;
        match self.attributes.get(&path, &self.attribute_name) {
            Ok(value) if self.options.hash.is_digest(&value) => Some(value),
            Ok(value) => {
                warn!(file, value = %value, "ignoring malformed hash attribute");
                None
            }
            Err(e) => {
                debug!(file, error = %e, "no hash attribute, plain delete");
                None
            }
        }
    }

    /// Remove the blob for `hash` if no caller-visible file links it anymore.
    ///
    /// Returns whether the blob was removed by this call.
    fn release_source(&self, hash: &str) -> Result<bool> {
        let key = self.mapper.path_for(hash);
        let meta = match self.stat(&key) {
            Ok(meta) => meta,
            // Already reclaimed by someone else, or `file` was the blob itself.
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if meta.nlink() != 1 {
            return Ok(false);
        }
        match self.backend.delete(&key) {
            Ok(()) => {
                debug!(%hash, "reclaimed blob");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// On-disk location of the blob for `hash` (whether or not it exists).
    pub fn blob_path(&self, hash: &str) -> Result<PathBuf> {
        self.backend.resolve(&self.mapper.path_for(hash))
    }

    /// Live link count of the blob inode, `None` if there is no blob.
    pub fn link_count(&self, hash: &str) -> Result<Option<u64>> {
        match self.stat(&self.mapper.path_for(hash)) {
            Ok(meta) => Ok(Some(meta.nlink())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of caller-visible files sharing the blob: the link count minus
    /// the blob's own entry in the store.
    pub fn caller_links(&self, hash: &str) -> Result<Option<u64>> {
        Ok(self.link_count(hash)?.map(|n| n.saturating_sub(1)))
    }

    pub(crate) fn stat(&self, key: &str) -> Result<fs::Metadata> {
        let path = self.backend.resolve(key)?;
        fs::symlink_metadata(&path).map_err(|e| CasError::from_io(&path, e))
    }
}

/// Key of the directory holding `file`, `None` at the backend root.
fn parent_key(file: &str) -> Option<&str> {
    let (parent, _) = file.trim_end_matches('/').rsplit_once('/')?;
    if parent.trim_matches('/').is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Whether both paths currently name the same inode.
fn same_inode(a: &Path, b: &Path) -> Result<bool> {
    Ok(match (inode_of(a)?, inode_of(b)?) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    })
}

fn inode_of(path: &Path) -> Result<Option<(u64, u64)>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some((meta.dev(), meta.ino()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CasError::from_io(path, e)),
    }
}

impl<B: StorageBackend, A: AttributeStore> StorageBackend for DedupStore<B, A> {
    fn resolve(&self, file: &str) -> Result<PathBuf> {
        self.backend.resolve(file)
    }

    fn write_file(&self, file: &str, data: &[u8], flags: WriteFlags) -> Result<()> {
        self.backend.write_file(file, data, flags)
    }

    fn read_file(&self, file: &str) -> Result<Vec<u8>> {
        self.backend.read_file(file)
    }

    fn delete(&self, file: &str) -> Result<()> {
        DedupStore::delete(self, file)
    }

    fn mkdir(&self, dir: &str) -> Result<()> {
        self.backend.mkdir(dir)
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.backend.list(dir)
    }

    fn rmdir(&self, dir: &str) -> Result<()> {
        self.backend.rmdir(dir)
    }

    fn rmtree(&self, dir: &str) -> Result<()> {
        self.backend.rmtree(dir)
    }

    fn sync(&self) -> Result<()> {
        DedupStore::sync(self)
    }

    fn forget(&self) -> Result<()> {
        self.backend.forget()
    }

    fn check_support(&self) -> Capabilities {
        DedupStore::check_support(self)
    }

    fn name(&self) -> &'static str {
        "dedup"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::NoAttributes;
    use crate::backend::LocalBackend;
    use crate::link_strategy::HardLinkStrategy;
    use crate::HashAlgorithm;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn store() -> Option<(TempDir, DedupStore<LocalBackend>)> {
        let temp = TempDir::new().unwrap();
        let store = DedupStore::new(LocalBackend::new(temp.path()).unwrap(), StoreOptions::default());
        store.sync().unwrap();
        if !store.check_support().dedup {
            println!("Skipping: temp filesystem lacks hard links or user xattrs");
            return None;
        }
        Some((temp, store))
    }

    /// Attributes kept in memory per inode. The first `fail_sets` sets
    /// behave as if a collector removed the blob right before them.
    #[derive(Default)]
    struct RacingAttributes {
        values: Mutex<HashMap<(u64, u64), String>>,
        fail_sets: AtomicU32,
    }

    impl RacingAttributes {
        fn failing(n: u32) -> Self {
            Self {
                fail_sets: AtomicU32::new(n),
                ..Self::default()
            }
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn inode(path: &Path) -> Result<(u64, u64)> {
        let meta = fs::metadata(path).map_err(|e| CasError::from_io(path, e))?;
        Ok((meta.dev(), meta.ino()))
    }

    impl AttributeStore for RacingAttributes {
        fn get(&self, path: &Path, name: &str) -> Result<String> {
            let inode = inode(path)?;
            self.values
                .lock()
                .unwrap()
                .get(&inode)
                .cloned()
                .ok_or_else(|| CasError::NotFound {
                    path: format!("{}#{name}", path.display()),
                })
        }

        fn set(&self, path: &Path, _name: &str, value: &str) -> Result<()> {
            if take_failure(&self.fail_sets) {
                fs::remove_file(path).unwrap();
                return Err(CasError::NotFound {
                    path: path.display().to_string(),
                });
            }
            let inode = inode(path)?;
            self.values.lock().unwrap().insert(inode, value.to_string());
            Ok(())
        }

        fn is_supported(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "racing"
        }
    }

    /// Hard links, except that the first `failures` calls remove the source
    /// first, as a collector running in between would.
    struct VanishingLink {
        failures: AtomicU32,
    }

    impl LinkStrategy for VanishingLink {
        fn link_file(&self, source: &Path, target: &Path) -> Result<()> {
            if take_failure(&self.failures) {
                fs::remove_file(source).unwrap();
            }
            HardLinkStrategy.link_file(source, target)
        }

        fn name(&self) -> &'static str {
            "vanishing"
        }
    }

    fn racing_store(
        attributes: RacingAttributes,
        race_retries: u32,
    ) -> (TempDir, DedupStore<LocalBackend, RacingAttributes>) {
        let temp = TempDir::new().unwrap();
        let options = StoreOptions {
            race_retries,
            ..StoreOptions::default()
        };
        let store =
            DedupStore::with_attributes(LocalBackend::new(temp.path()).unwrap(), attributes, options);
        store.sync().unwrap();
        (temp, store)
    }

    #[test]
    fn test_blob_removed_before_attribute_is_recreated() {
        let (_temp, store) = racing_store(RacingAttributes::failing(2), 16);

        let hash = store.write("a", b"abc", WriteOptions::dedup()).unwrap();

        assert_eq!(hash.as_deref(), Some(ABC));
        assert_eq!(store.attributes.fail_sets.load(Ordering::SeqCst), 0);
        assert_eq!(store.read("a").unwrap(), b"abc");
        assert_eq!(store.read_source(ABC).unwrap(), b"abc");
        assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
        assert_eq!(
            store
                .attributes
                .get(&store.blob_path(ABC).unwrap(), store.attribute_name())
                .unwrap(),
            ABC
        );
    }

    #[test]
    fn test_attribute_races_exhaust_retries() {
        let (_temp, store) = racing_store(RacingAttributes::failing(3), 3);

        let err = store.write("a", b"abc", WriteOptions::dedup()).unwrap_err();

        match err {
            CasError::RaceRetriesExhausted { hash, attempts } => {
                assert_eq!(hash, ABC);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.read("a").unwrap_err().is_not_found());
        assert_eq!(store.link_count(ABC).unwrap(), None);
    }

    #[test]
    fn test_blob_removed_before_link_is_recreated() {
        static LINKER: VanishingLink = VanishingLink {
            failures: AtomicU32::new(1),
        };
        let (_temp, store) = racing_store(RacingAttributes::default(), 16);
        let store = store.with_link_strategy(&LINKER);

        let hash = store.write("dir/a", b"abc", WriteOptions::dedup()).unwrap();

        assert_eq!(hash.as_deref(), Some(ABC));
        assert_eq!(LINKER.failures.load(Ordering::SeqCst), 0);
        assert_eq!(store.read("dir/a").unwrap(), b"abc");
        assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
        assert_eq!(
            store
                .attributes
                .get(&store.resolve("dir/a").unwrap(), store.attribute_name())
                .unwrap(),
            ABC
        );
    }

    #[test]
    fn test_link_races_exhaust_retries() {
        static LINKER: VanishingLink = VanishingLink {
            failures: AtomicU32::new(u32::MAX),
        };
        let (_temp, store) = racing_store(RacingAttributes::default(), 2);
        let store = store.with_link_strategy(&LINKER);

        let err = store.write("a", b"abc", WriteOptions::dedup()).unwrap_err();

        assert!(matches!(
            err,
            CasError::RaceRetriesExhausted { attempts: 2, .. }
        ));
        assert!(store.read("a").unwrap_err().is_not_found());
        assert_eq!(store.link_count(ABC).unwrap(), None);
    }

    #[test]
    fn test_parent_key() {
        assert_eq!(parent_key("a"), None);
        assert_eq!(parent_key("/a"), None);
        assert_eq!(parent_key("backups/vm1/disk.vhd"), Some("backups/vm1"));
        assert_eq!(parent_key("/backups/disk.vhd"), Some("/backups"));
    }

    #[test]
    fn test_dedup_write_links_to_blob() {
        let Some((_temp, store)) = store() else { return };

        let hash = store.write("a", b"abc", WriteOptions::dedup()).unwrap();
        assert_eq!(hash.as_deref(), Some(ABC));

        let a = fs::metadata(store.resolve("a").unwrap()).unwrap();
        let blob = fs::metadata(store.blob_path(ABC).unwrap()).unwrap();
        assert_eq!(a.ino(), blob.ino());
        assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
        assert_eq!(store.read("a").unwrap(), b"abc");
    }

    #[test]
    fn test_blob_carries_hash_attribute() {
        let Some((_temp, store)) = store() else { return };

        store.write("nested/dir/a", b"abc", WriteOptions::dedup()).unwrap();

        let via_file = store
            .attributes
            .get(&store.resolve("nested/dir/a").unwrap(), "user.hash.sha256")
            .unwrap();
        let via_blob = store
            .attributes
            .get(&store.blob_path(ABC).unwrap(), "user.hash.sha256")
            .unwrap();
        assert_eq!(via_file, ABC);
        assert_eq!(via_blob, ABC);
    }

    #[test]
    fn test_plain_write_never_touches_store() {
        let Some((_temp, store)) = store() else { return };

        assert_eq!(store.write("plain", b"abc", WriteOptions::default()).unwrap(), None);

        assert!(store.list(store.mapper().root()).unwrap().is_empty());
        assert_eq!(store.link_count(ABC).unwrap(), None);
        let err = store
            .attributes
            .get(&store.resolve("plain").unwrap(), store.attribute_name())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ensure_source_is_idempotent() {
        let Some((_temp, store)) = store() else { return };

        let first = store.ensure_source(ABC, b"abc").unwrap();
        let second = store.ensure_source(ABC, b"abc").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.link_count(ABC).unwrap(), Some(1));
        assert_eq!(store.read_source(ABC).unwrap(), b"abc");
    }

    #[test]
    fn test_rewrite_same_content_keeps_link() {
        let Some((_temp, store)) = store() else { return };

        store.write("a", b"abc", WriteOptions::dedup()).unwrap();
        store.write("a", b"abc", WriteOptions::dedup()).unwrap();

        assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
    }

    #[test]
    fn test_overwrite_releases_previous_blob() {
        let Some((_temp, store)) = store() else { return };

        store.write("a", b"abc", WriteOptions::dedup()).unwrap();
        let new_hash = store.write("a", b"xyz", WriteOptions::dedup()).unwrap().unwrap();

        assert_eq!(store.read("a").unwrap(), b"xyz");
        assert_eq!(store.link_count(ABC).unwrap(), None);
        assert_eq!(store.caller_links(&new_hash).unwrap(), Some(1));
    }

    #[test]
    fn test_exclusive_dedup_write_refuses_existing_file() {
        let Some((_temp, store)) = store() else { return };

        store.write("a", b"old", WriteOptions::default()).unwrap();
        let options = WriteOptions {
            dedup: true,
            exclusive: true,
        };
        let err = store.write("a", b"abc", options).unwrap_err();

        assert!(err.is_already_exists());
        assert_eq!(store.read("a").unwrap(), b"old");
        // The blob stays behind for the collector.
        assert_eq!(store.caller_links(ABC).unwrap(), Some(0));
    }

    #[test]
    fn test_delete_plain_file_without_attributes() {
        let temp = TempDir::new().unwrap();
        let store = DedupStore::with_attributes(
            LocalBackend::new(temp.path()).unwrap(),
            NoAttributes,
            StoreOptions::default(),
        );
        store.sync().unwrap();
        store.write("plain", b"data", WriteOptions::default()).unwrap();

        store.delete("plain").unwrap();
        assert!(store.read("plain").unwrap_err().is_not_found());
    }

    #[test]
    fn test_dedup_write_degrades_without_attributes() {
        let temp = TempDir::new().unwrap();
        let store = DedupStore::with_attributes(
            LocalBackend::new(temp.path()).unwrap(),
            NoAttributes,
            StoreOptions::default(),
        );
        store.sync().unwrap();

        assert_eq!(store.write("a", b"abc", WriteOptions::dedup()).unwrap(), None);

        assert_eq!(store.read("a").unwrap(), b"abc");
        assert_eq!(store.link_count(ABC).unwrap(), None);
        assert_eq!(store.collect_garbage(None).unwrap().blobs_removed, 0);
    }

    #[test]
    fn test_delete_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = DedupStore::new(LocalBackend::new(temp.path()).unwrap(), StoreOptions::default());
        assert!(store.delete("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_the_blob_itself() {
        let Some((_temp, store)) = store() else { return };

        let key = store.ensure_source(ABC, b"abc").unwrap();
        store.delete(&key).unwrap();
        assert_eq!(store.link_count(ABC).unwrap(), None);
    }

    #[test]
    fn test_blake3_store_uses_its_own_attribute() {
        let temp = TempDir::new().unwrap();
        let options = StoreOptions {
            hash: HashAlgorithm::Blake3,
            ..StoreOptions::default()
        };
        let store = DedupStore::new(LocalBackend::new(temp.path()).unwrap(), options);
        store.sync().unwrap();
        if !store.check_support().dedup {
            println!("Skipping: temp filesystem lacks hard links or user xattrs");
            return;
        }

        let hash = store.write("a", b"abc", WriteOptions::dedup()).unwrap().unwrap();
        assert_eq!(hash, HashAlgorithm::Blake3.digest_hex(b"abc"));
        assert_eq!(store.attribute_name(), "user.hash.blake3");
        assert_eq!(
            store
                .attributes
                .get(&store.resolve("a").unwrap(), "user.hash.blake3")
                .unwrap(),
            hash
        );
    }

    #[test]
    fn test_read_source_detects_corruption() {
        let Some((_temp, store)) = store() else { return };

        store.ensure_source(ABC, b"abc").unwrap();
        fs::write(store.blob_path(ABC).unwrap(), b"tampered").unwrap();

        assert!(matches!(
            store.read_source(ABC),
            Err(CasError::HashMismatch { .. })
        ));
    }
}
