use std::fs;
use std::os::unix::fs::MetadataExt;

use linkstore_cas::{
    DedupStore, HashAlgorithm, LocalBackend, StorageBackend, StoreOptions, WriteOptions,
};
use tempfile::TempDir;

const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn dedup_store() -> Option<(TempDir, DedupStore<LocalBackend>)> {
    let temp = TempDir::new().unwrap();
    let store = DedupStore::new(LocalBackend::new(temp.path()).unwrap(), StoreOptions::default());
    store.sync().unwrap();
    if !store.check_support().dedup {
        println!("Skipping: temp filesystem lacks hard links or user xattrs");
        return None;
    }
    Some((temp, store))
}

#[test]
fn test_two_files_one_blob_lifecycle() {
    let Some((temp, store)) = dedup_store() else { return };

    store.write("a", b"abc", WriteOptions::dedup()).unwrap();
    store.write("b", b"abc", WriteOptions::dedup()).unwrap();

    let blob = temp.path().join(
        "xo-block-store/ba78/16bf/8f01/cfea/4141/40de/5dae/2223/\
         b003/61a3/9617/7a9c/b410/ff61/f200/15ad.source",
    );
    assert_eq!(store.blob_path(ABC).unwrap(), blob);
    assert_eq!(fs::read(&blob).unwrap(), b"abc");
    assert_eq!(store.caller_links(ABC).unwrap(), Some(2));
    assert_eq!(
        xattr::get(&blob, "user.hash.sha256").unwrap().as_deref(),
        Some(ABC.as_bytes())
    );
    let ino = fs::metadata(&blob).unwrap().ino();
    for name in ["a", "b"] {
        assert_eq!(fs::metadata(temp.path().join(name)).unwrap().ino(), ino);
        assert_eq!(store.read(name).unwrap(), b"abc");
    }

    store.delete("a").unwrap();
    assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
    assert_eq!(store.read("b").unwrap(), b"abc");

    store.delete("b").unwrap();
    assert!(!blob.exists());
    assert_eq!(store.link_count(ABC).unwrap(), None);
}

#[test]
fn test_plain_and_dedup_files_coexist() {
    let Some((_temp, store)) = dedup_store() else { return };

    store.write("dedup", b"abc", WriteOptions::dedup()).unwrap();
    store.write("plain", b"abc", WriteOptions::default()).unwrap();

    assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
    store.delete("plain").unwrap();
    assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
    store.delete("dedup").unwrap();
    assert_eq!(store.link_count(ABC).unwrap(), None);
}

#[test]
fn test_gc_keeps_referenced_blobs_and_store_root() {
    let Some((temp, store)) = dedup_store() else { return };

    store.write("backups/vm1/disk.vhd", b"abc", WriteOptions::dedup()).unwrap();
    let orphan = store.write("tmp", b"orphan", WriteOptions::dedup()).unwrap().unwrap();
    // Removed behind the store's back: the blob is left with no caller.
    fs::remove_file(temp.path().join("tmp")).unwrap();

    let report = store.collect_garbage(None).unwrap();

    assert_eq!(report.blobs_removed, 1);
    assert_eq!(report.blobs_kept, 1);
    assert_eq!(store.link_count(&orphan).unwrap(), None);
    assert_eq!(store.caller_links(ABC).unwrap(), Some(1));
    assert_eq!(store.read("backups/vm1/disk.vhd").unwrap(), b"abc");
    assert!(temp.path().join("xo-block-store").is_dir());

    // The store keeps working after a sweep.
    store.write("c", b"abc", WriteOptions::dedup()).unwrap();
    assert_eq!(store.caller_links(ABC).unwrap(), Some(2));
}

#[test]
fn test_stats_and_verify_after_writes() {
    let Some((_temp, store)) = dedup_store() else { return };

    for i in 0..10 {
        let content = if i % 2 == 0 {
            format!("unique {i}")
        } else {
            "shared".to_string()
        };
        store
            .write(&format!("files/{i}"), content.as_bytes(), WriteOptions::dedup())
            .unwrap();
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.blob_count, 6);
    assert_eq!(stats.caller_links, 10);
    assert_eq!(stats.shared_blobs, 6);
    assert_eq!(stats.orphan_blobs, 0);

    let report = store.verify().unwrap();
    assert_eq!(report.checked, 6);
    assert!(report.is_clean());
    assert!(report.missing_attribute.is_empty());
}

#[test]
fn test_store_behind_trait_object() {
    let temp = TempDir::new().unwrap();
    let options = StoreOptions {
        hash: HashAlgorithm::Blake3,
        block_store: "/blocks".to_string(),
        ..StoreOptions::default()
    };
    let store: Box<dyn StorageBackend> =
        Box::new(DedupStore::new(LocalBackend::new(temp.path()).unwrap(), options));

    store.sync().unwrap();
    assert!(temp.path().join("blocks").is_dir());

    store.write_file("x", b"data", Default::default()).unwrap();
    assert_eq!(store.read_file("x").unwrap(), b"data");
    store.delete("x").unwrap();
    assert!(store.read_file("x").unwrap_err().is_not_found());
}
