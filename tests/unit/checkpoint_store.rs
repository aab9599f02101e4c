//! File checkpoint store behavior across handles and threads

use easm_collector::resume::{
    checkpoint_file_name, CheckpointStore, CollectionLock, FileCheckpointStore,
};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_two_handles_see_each_others_writes() {
    let dir = TempDir::new().unwrap();
    let writer = FileCheckpointStore::new(dir.path());
    let reader = FileCheckpointStore::new(dir.path());

    writer
        .set("defender_easm_hosts:next_link", "https://x/a")
        .unwrap();
    assert_eq!(
        reader.get("defender_easm_hosts:next_link").unwrap().as_deref(),
        Some("https://x/a")
    );

    writer
        .set("defender_easm_hosts:next_link", "https://x/b")
        .unwrap();
    assert_eq!(
        reader.get("defender_easm_hosts:next_link").unwrap().as_deref(),
        Some("https://x/b")
    );
}

#[test]
fn test_concurrent_writers_on_distinct_keys() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                let key = format!("defender_easm_c{i}:next_link");
                for page in 0..20 {
                    store.set(&key, &format!("https://x/c{i}/p{page}")).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8 {
        assert_eq!(
            store
                .get(&format!("defender_easm_c{i}:next_link"))
                .unwrap()
                .unwrap(),
            format!("https://x/c{i}/p19")
        );
    }
    let records = store.list_records().unwrap();
    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|(_, r)| r.is_ok()));
}

#[test]
fn test_file_names_follow_key_hash() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path());
    store
        .set("defender_easm_asns:watermark", "2024-02-02T00:00:00Z")
        .unwrap();
    assert!(dir
        .path()
        .join(checkpoint_file_name("defender_easm_asns:watermark"))
        .exists());
}

#[test]
fn test_run_lock_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let held = CollectionLock::try_acquire(dir.path(), "hosts").unwrap();
    assert!(CollectionLock::try_acquire(dir.path(), "hosts").is_err());
    // Other collections are independent.
    let _other = CollectionLock::try_acquire(dir.path(), "asns").unwrap();

    drop(held);
    assert!(CollectionLock::try_acquire(dir.path(), "hosts").is_ok());
}
