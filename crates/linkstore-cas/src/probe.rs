//! Capability probe.
//!
//! Hard links and user extended attributes are filesystem features, not
//! platform features: an NFS export, a FAT volume or a tmpfs on an older
//! kernel can lack either one. Before trusting deduplication for a session the
//! store exercises the exact sequence the write path depends on, on the real
//! backend, with throw-away files.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tracing::{debug, warn};

use crate::attributes::AttributeStore;
use crate::backend::{Capabilities, StorageBackend, WriteFlags};
use crate::store::DedupStore;
use crate::Result;

impl<B: StorageBackend, A: AttributeStore> DedupStore<B, A> {
    /// Backend capabilities, plus whether deduplication works here.
    ///
    /// Never fails: any error while probing is logged and reported as
    /// `dedup: false`.
    pub fn check_support(&self) -> Capabilities {
        let mut capabilities = self.backend.check_support();
        capabilities.dedup = match self.probe_dedup() {
            Ok(supported) => supported,
            Err(e) => {
                warn!(error = %e, backend = self.backend.name(), "error while testing deduplication");
                false
            }
        };
        debug!(?capabilities, "capability probe finished");
        capabilities
    }

    fn probe_dedup(&self) -> Result<bool> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let tag = format!("{stamp}-{:08x}", rand::random::<u32>());
        let source = format!("{tag}.sourcededup");
        let dest = format!("{tag}.destdedup");

        let result = self.probe_sequence(&source, &dest);

        // Best effort: the probe must leave nothing behind.
        let _ = self.backend.delete(&source);
        let _ = self.backend.delete(&dest);
        result
    }

    fn probe_sequence(&self, source: &str, dest: &str) -> Result<bool> {
        let mut data = vec![0u8; self.options.probe_size];
        rand::thread_rng().fill_bytes(&mut data);
        let hash = self.options.hash.digest_hex(&data);

        self.backend.write_file(source, &data, WriteFlags::exclusive())?;
        let source_path = self.backend.resolve(source)?;
        self.attributes.set(&source_path, &self.attribute_name, &hash)?;
        self.link(&source_path, &self.backend.resolve(dest)?)?;

        let read_back = self.attributes.get(&source_path, &self.attribute_name)?;
        Ok(read_back == hash)
    }
}

#[cfg(test)]
mod tests {
    use crate::attributes::{AttributeStore, NoAttributes, XattrStore};
    use crate::backend::{LocalBackend, StorageBackend};
    use crate::link_strategy::LinkStrategy;
    use crate::{CasError, DedupStore, Result, StoreOptions};
    use std::path::Path;
    use tempfile::TempDir;

    struct NoHardLinks;

    impl LinkStrategy for NoHardLinks {
        fn link_file(&self, _source: &Path, _target: &Path) -> Result<()> {
            Err(CasError::Unsupported("hard links".into()))
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    static NO_HARD_LINKS: NoHardLinks = NoHardLinks;

    fn options() -> StoreOptions {
        StoreOptions {
            probe_size: 4096,
            ..StoreOptions::default()
        }
    }

    fn leftovers(temp: &TempDir) -> Vec<String> {
        std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with("dedup"))
            .collect()
    }

    #[test]
    fn test_without_attributes_reports_no_dedup() {
        let temp = TempDir::new().unwrap();
        let store =
            DedupStore::with_attributes(LocalBackend::new(temp.path()).unwrap(), NoAttributes, options());

        let caps = store.check_support();

        assert!(!caps.dedup);
        assert!(caps.exclusive_create, "backend capabilities are passed through");
        assert!(leftovers(&temp).is_empty());
    }

    #[test]
    fn test_without_hard_links_reports_no_dedup() {
        let temp = TempDir::new().unwrap();
        let store = DedupStore::new(LocalBackend::new(temp.path()).unwrap(), options())
            .with_link_strategy(&NO_HARD_LINKS);

        assert!(!store.check_support().dedup);
        assert!(leftovers(&temp).is_empty());
    }

    #[test]
    fn test_supported_filesystem_reports_dedup() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("xattr-check");
        std::fs::write(&file, b"x").unwrap();
        let has_xattrs = XattrStore.set(&file, "user.check", "1").is_ok();
        std::fs::remove_file(&file).unwrap();
        if !has_xattrs {
            println!("Skipping: no user xattr support on temp filesystem");
            return;
        }

        let store = DedupStore::new(LocalBackend::new(temp.path()).unwrap(), options());

        assert!(store.check_support().dedup);
        assert!(leftovers(&temp).is_empty());
    }

    #[test]
    fn test_probe_through_backend_trait() {
        let temp = TempDir::new().unwrap();
        let store =
            DedupStore::with_attributes(LocalBackend::new(temp.path()).unwrap(), NoAttributes, options());
        let backend: &dyn StorageBackend = &store;

        assert_eq!(backend.name(), "dedup");
        assert!(!backend.check_support().dedup);
    }
}
