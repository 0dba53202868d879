// End-to-end cycle scenarios against the in-memory store

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use bucketsync::store::{MemoryStore, ObjectStore};
use bucketsync::sync::hash::md5_hex;
use bucketsync::sync::{ChangeDetector, DecisionReason};
use chrono::Utc;

use crate::common::{engine, test_config, touch_future, write_file, FaultyStore};

#[test]
fn test_scenario_a_absent_remote_is_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "hello.txt", b"hello");
    let store = Arc::new(MemoryStore::new());

    let decision = ChangeDetector::new(store.clone(), 1024)
        .needs_upload("hello.txt", &path)
        .unwrap();
    assert!(decision.upload);
    assert_eq!(decision.reason, DecisionReason::RemoteMissing);

    let report = engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert!(report.is_success());
    assert_eq!(report.uploads.succeeded, 1);
    assert_eq!(store.head("hello.txt").unwrap().size, 5);
}

#[test]
fn test_scenario_b_remote_newer_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "notes.txt", b"same content");
    let store = Arc::new(MemoryStore::new());
    store.insert_object(
        "notes.txt",
        b"diff content".to_vec(),
        Some(Utc::now() + chrono::Duration::hours(1)),
        &md5_hex(b"diff content"),
    );

    let decision = ChangeDetector::new(store.clone(), 1024)
        .needs_upload("notes.txt", &path)
        .unwrap();

    assert!(!decision.upload);
    assert_eq!(decision.reason, DecisionReason::RemoteUpToDate);
}

#[test]
fn test_scenario_c_hash_match_overrides_newer_local() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "notes.txt", b"same content");
    let store = Arc::new(MemoryStore::new());
    store.insert_object(
        "notes.txt",
        b"same content".to_vec(),
        Some(Utc::now() - chrono::Duration::hours(1)),
        &md5_hex(b"same content"),
    );

    let decision = ChangeDetector::new(store.clone(), 1024)
        .needs_upload("notes.txt", &path)
        .unwrap();

    assert!(!decision.upload);
    assert_eq!(decision.reason, DecisionReason::ContentMatches);
}

#[test]
fn test_scenario_d_multipart_tag_forces_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "notes.txt", b"same content");
    let store = Arc::new(MemoryStore::new());
    store.insert_object(
        "notes.txt",
        b"same content".to_vec(),
        Some(Utc::now() - chrono::Duration::hours(1)),
        "abc-3",
    );

    let decision = ChangeDetector::new(store.clone(), 1024)
        .needs_upload("notes.txt", &path)
        .unwrap();

    assert!(decision.upload);
    assert_eq!(decision.reason, DecisionReason::MultipartTagNewer);
}

#[test]
fn test_scenario_e_large_file_uploads_in_three_parts() {
    const KIB: u64 = 1024;
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..150 * KIB).map(|i| (i % 251) as u8).collect();
    write_file(dir.path(), "video.bin", &content);
    let store = Arc::new(MemoryStore::new());

    let mut config = test_config(dir.path());
    config.multipart_threshold = 100 * KIB;
    config.part_size = 50 * KIB;
    config.part_concurrency = 3;
    let report = engine(config, store.clone()).run_cycle().unwrap();

    assert!(report.is_success());
    assert_eq!(report.uploads.bytes_transferred, 150 * KIB);
    let record = store.multipart_record("video.bin").unwrap();
    assert_eq!(record.parts, 3);
    assert!(record.peak_in_flight >= 1 && record.peak_in_flight <= 3);
    assert_eq!(store.get("video.bin").unwrap(), content);
    assert!(store.head("video.bin").unwrap().etag.ends_with("-3"));
}

#[test]
fn test_scenario_f_locally_deleted_file_is_removed_remotely() {
    let dir = tempfile::tempdir().unwrap();
    let old = write_file(dir.path(), "old.txt", b"old");
    write_file(dir.path(), "keep.txt", b"keep");
    let store = Arc::new(FaultyStore::new());
    let engine = engine(test_config(dir.path()), store.clone());

    let first = engine.run_cycle().unwrap();
    assert_eq!(first.uploads.succeeded, 2);
    assert_eq!(store.deletes(), 0);

    fs::remove_file(old).unwrap();
    let second = engine.run_cycle().unwrap();

    assert_eq!(store.deletes(), 1);
    assert_eq!(second.deleted().to_vec(), vec!["old.txt"]);
    assert_eq!(store.inner.keys(), vec!["keep.txt"]);
}

#[test]
fn test_second_cycle_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.txt", b"alpha");
    write_file(dir.path(), "docs/b.md", b"bravo");
    write_file(dir.path(), "docs/deep/c.json", b"{}");
    let store = Arc::new(FaultyStore::new());
    let engine = engine(test_config(dir.path()), store.clone());

    let first = engine.run_cycle().unwrap();
    assert_eq!(first.uploads.succeeded, 3);
    let puts = store.puts();

    let second = engine.run_cycle().unwrap();

    assert!(second.is_success());
    assert_eq!(second.uploads.succeeded, 0);
    assert_eq!(second.uploads.skipped, 3);
    assert_eq!(store.puts(), puts);
    assert!(second.deleted().is_empty());
}

#[test]
fn test_changed_file_is_uploaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.txt", b"first version");
    let store = Arc::new(MemoryStore::new());
    let engine = engine(test_config(dir.path()), store.clone());
    engine.run_cycle().unwrap();

    // Same size, different content, newer mtime.
    fs::write(&path, b"final version").unwrap();
    touch_future(&path, Duration::from_secs(3600));
    let report = engine.run_cycle().unwrap();

    assert_eq!(report.uploads.succeeded, 1);
    assert_eq!(store.get("a.txt").unwrap(), b"final version");
}

#[test]
fn test_nested_keys_use_forward_slashes() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "docs/guide/intro.md", b"intro");
    let store = Arc::new(MemoryStore::new());

    engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert_eq!(store.keys(), vec!["docs/guide/intro.md"]);
}

#[test]
fn test_ignore_file_excludes_uploads() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), ".syncignore", b"# private\nprivate/notes.txt\n");
    write_file(dir.path(), "private/notes.txt", b"secret");
    write_file(dir.path(), "public.txt", b"hi");
    let store = Arc::new(MemoryStore::new());

    engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert!(store.contains("public.txt"));
    assert!(!store.contains("private/notes.txt"));
}

#[test]
fn test_ignored_local_file_keeps_remote_copy() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "secret.env", b"TOKEN=1");
    let store = Arc::new(FaultyStore::new());
    // Uploaded before the pattern was added.
    store.inner.insert_object("secret.env", b"TOKEN=0".to_vec(), None, "e");
    store.inner.insert_object("build.log", b"log".to_vec(), None, "e");

    let mut config = test_config(dir.path());
    config.ignore_patterns = vec!["secret.env".to_string(), "build.log".to_string()];
    let report = engine(config, store.clone()).run_cycle().unwrap();

    // Never uploaded, never deleted while the local file exists.
    assert_eq!(store.puts(), 0);
    assert_eq!(store.inner.get("secret.env").unwrap(), b"TOKEN=0");
    // Ignored keys without a local file are deleted like any other.
    assert_eq!(report.deleted().to_vec(), vec!["build.log"]);
}

#[test]
fn test_file_name_matching_applies_in_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a/.DS_Store", b"x");
    write_file(dir.path(), "a/b/.DS_Store", b"x");
    write_file(dir.path(), "a/keep.txt", b"k");
    let store = Arc::new(MemoryStore::new());

    let mut config = test_config(dir.path());
    config.ignore_patterns = vec![".DS_Store".to_string()];
    config.match_file_names = true;
    engine(config, store.clone()).run_cycle().unwrap();

    assert_eq!(store.keys(), vec!["a/keep.txt"]);
}

#[test]
fn test_independent_engines_run_in_parallel() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    write_file(first_dir.path(), "one.txt", b"1");
    write_file(second_dir.path(), "two.txt", b"2");
    let first_store = Arc::new(MemoryStore::new());
    let second_store = Arc::new(MemoryStore::new());
    let first = engine(test_config(first_dir.path()), first_store.clone());
    let second = engine(test_config(second_dir.path()), second_store.clone());

    std::thread::scope(|scope| {
        let a = scope.spawn(|| first.run_cycle().unwrap());
        let b = scope.spawn(|| second.run_cycle().unwrap());
        assert!(a.join().unwrap().is_success());
        assert!(b.join().unwrap().is_success());
    });

    assert_eq!(first_store.keys(), vec!["one.txt"]);
    assert_eq!(second_store.keys(), vec!["two.txt"]);
}

#[cfg(unix)]
#[test]
fn test_symlinked_file_is_uploaded_and_kept() {
    use std::os::unix::fs::symlink;

    let dir = tempfile::tempdir().unwrap();
    let target = write_file(dir.path(), "data/report.csv", b"a,b\n1,2\n");
    write_file(dir.path(), "data/nested/deep.txt", b"deep");
    symlink(&target, dir.path().join("latest.csv")).unwrap();
    symlink(dir.path().join("data"), dir.path().join("data-link")).unwrap();
    let store = Arc::new(FaultyStore::new());
    let engine = engine(test_config(dir.path()), store.clone());

    let first = engine.run_cycle().unwrap();

    assert!(first.is_success());
    assert_eq!(
        store.inner.keys(),
        vec!["data/nested/deep.txt", "data/report.csv", "latest.csv"]
    );
    assert_eq!(store.inner.get("latest.csv").unwrap(), b"a,b\n1,2\n");

    let second = engine.run_cycle().unwrap();
    assert!(second.deleted().is_empty());
    assert_eq!(store.deletes(), 0);
}
