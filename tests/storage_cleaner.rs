#[path = "common/mod.rs"]
mod common;

use access_logs_etl::{LocalObjectStore, MemoryObjectStore, ObjectStore, StorageCleaner};
use common::*;
use std::fs;
use std::sync::Arc;

/// An empty prefix is listed once and no delete request is ever issued.
#[test]
fn empty_prefix_issues_no_delete() {
    let mem = Arc::new(MemoryObjectStore::new());
    mem.put("bucket", "other/file", "x");
    let store = Arc::new(CountingStore::new(mem.clone()));

    let deleted = StorageCleaner::new(store.clone()).delete_all("bucket", "data/year=2019/").unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(store.lists(), 1);
    assert_eq!(store.batch_deletes(), 0);
    assert_eq!(mem.keys("bucket"), vec!["other/file".to_string()]);

    // unknown bucket behaves the same
    assert_eq!(StorageCleaner::new(store.clone()).delete_all("nope", "data/").unwrap(), 0);
    assert_eq!(store.batch_deletes(), 0);
}

/// More objects than one page: the cleaner keeps listing and deleting until the prefix is
/// empty, and leaves neighbouring prefixes alone.
#[test]
fn deletes_across_pages() {
    let mem = Arc::new(MemoryObjectStore::new());
    for i in 0..7 {
        mem.put("bucket", &format!("cloudfront/search/year=2019/month=12/day=21/hour=12/part-{i}"), "x");
    }
    mem.put("bucket", "cloudfront/search/year=2019/month=12/day=21/hour=13/part-0", "keep");
    let store = Arc::new(CountingStore::new(mem.clone()));

    let deleted = StorageCleaner::new(store.clone())
        .page_size(3)
        .delete_all("bucket", "cloudfront/search/year=2019/month=12/day=21/hour=12/")
        .unwrap();
    assert_eq!(deleted, 7);
    assert_eq!(store.batch_deletes(), 3);
    assert_eq!(mem.keys("bucket"), vec!["cloudfront/search/year=2019/month=12/day=21/hour=13/part-0".to_string()]);
}

/// An exact multiple of the page size needs one extra (empty) listing to be sure.
#[test]
fn exact_page_multiple_stops_on_empty_listing() {
    let mem = Arc::new(MemoryObjectStore::new());
    for i in 0..4 {
        mem.put("bucket", &format!("p/{i}"), "x");
    }
    let store = Arc::new(CountingStore::new(mem.clone()));
    let deleted = StorageCleaner::new(store.clone()).page_size(2).delete_all("bucket", "p/").unwrap();
    assert_eq!(deleted, 4);
    assert_eq!(store.lists(), 3);
    assert_eq!(store.batch_deletes(), 2);
    assert!(mem.keys("bucket").is_empty());
}

/// Listing pages follow continuation tokens in key order.
#[test]
fn memory_listing_pages_in_order() {
    let mem = MemoryObjectStore::new();
    for k in ["a/3", "a/1", "a/2", "b/1"] {
        mem.put("bucket", k, "x");
    }
    let first = mem.list_objects("bucket", "a/", None, 2).unwrap();
    assert_eq!(first.keys, vec!["a/1", "a/2"]);
    let second = mem.list_objects("bucket", "a/", first.next_token.as_deref(), 2).unwrap();
    assert_eq!(second.keys, vec!["a/3"]);
    assert!(second.next_token.is_none());
}

/// The directory-backed store lists, copies and deletes below `<root>/<bucket>/`.
#[test]
fn local_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let data = root.join("bucket").join("cloudfronts").join("raw").join("year=2019");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("a.gz"), b"a").unwrap();
    fs::write(data.join("b.gz"), b"b").unwrap();
    fs::write(root.join("bucket").join("cloudfronts").join("top.gz"), b"t").unwrap();

    let store = Arc::new(LocalObjectStore::new(root));
    let page = store.list_objects("bucket", "cloudfronts/raw/", None, 10).unwrap();
    assert_eq!(page.keys, vec!["cloudfronts/raw/year=2019/a.gz", "cloudfronts/raw/year=2019/b.gz"]);

    store.copy_object("bucket", "cloudfronts/top.gz", "other", "moved/top.gz").unwrap();
    assert_eq!(fs::read(root.join("other").join("moved").join("top.gz")).unwrap(), b"t");

    let deleted = StorageCleaner::new(store.clone()).delete_all("bucket", "cloudfronts/raw/").unwrap();
    assert_eq!(deleted, 2);
    assert!(!data.join("a.gz").exists());
    assert!(root.join("bucket").join("cloudfronts").join("top.gz").exists());
}

/// Keys that would escape the store root are rejected.
#[test]
fn local_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalObjectStore::new(dir.path());
    assert!(store.copy_object("bucket", "../secret", "bucket", "x").is_err());
    assert!(store.delete_object("bucket", "/etc/passwd").is_err());
    assert!(store.list_objects("..", "", None, 10).is_err());
}
