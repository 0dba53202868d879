// Failure injection: per-file errors stay per-file, phase errors stop their phase

use std::sync::Arc;

use bucketsync::error::{ErrorScope, SyncError};
use bucketsync::store::StoreError;

use crate::common::{engine, test_config, write_file, FaultyStore};

#[test]
fn test_head_failure_is_recorded_and_siblings_upload() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.txt", b"a");
    write_file(dir.path(), "b.txt", b"b");
    write_file(dir.path(), "c.txt", b"c");
    let store = Arc::new(FaultyStore::new());
    store.fail_head("b.txt");

    let report = engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert!(!report.is_success());
    assert_eq!(report.uploads.succeeded, 2);
    assert_eq!(report.uploads.failures.len(), 1);
    let failure = &report.uploads.failures[0];
    assert_eq!(failure.key, "b.txt");
    assert!(matches!(failure.error, SyncError::RemoteLookup { .. }));
    assert_eq!(failure.error.scope(), ErrorScope::File);
}

#[test]
fn test_upload_failure_does_not_block_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "good.txt", b"good");
    write_file(dir.path(), "bad.txt", b"bad");
    let store = Arc::new(FaultyStore::new());
    store.fail_put("bad.txt");
    store.inner.insert_object("stale.txt", b"x".to_vec(), None, "e");

    let report = engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert!(!report.is_success());
    assert_eq!(report.uploads.succeeded, 1);
    assert!(matches!(
        report.uploads.failures[0].error,
        SyncError::Upload { .. }
    ));
    assert_eq!(report.deleted().to_vec(), vec!["stale.txt"]);
    assert!(store.inner.contains("good.txt"));
    assert!(!store.inner.contains("bad.txt"));
}

#[test]
fn test_failed_upload_is_retried_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "flaky.txt", b"flaky");
    let store = Arc::new(FaultyStore::new());
    store.fail_put("flaky.txt");
    let engine = engine(test_config(dir.path()), store.clone());

    assert!(!engine.run_cycle().unwrap().is_success());

    store.fail_put.lock().unwrap().clear();
    let report = engine.run_cycle().unwrap();

    assert!(report.is_success());
    assert_eq!(report.uploads.succeeded, 1);
}

#[test]
fn test_list_failure_skips_reconcile_only() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.txt", b"a");
    let store = Arc::new(FaultyStore::new());
    store.inner.insert_object("stale.txt", b"x".to_vec(), None, "e");
    store.fail_list();

    let report = engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert_eq!(report.uploads.succeeded, 1);
    assert!(!report.is_success());
    let err = report.reconcile.as_ref().unwrap_err();
    assert!(matches!(err, SyncError::ReconcileList { .. }));
    assert_eq!(err.scope(), ErrorScope::Phase);
    assert_eq!(store.deletes(), 0);
    assert!(report.summary().reconcile_error.is_some());
}

#[test]
fn test_delete_failure_is_logged_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FaultyStore::new());
    store.inner.insert_object("locked.txt", b"x".to_vec(), None, "e");
    store.inner.insert_object("stale.txt", b"x".to_vec(), None, "e");
    store.fail_delete("locked.txt");

    let report = engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();

    assert!(report.is_success());
    let reconcile = report.reconcile.as_ref().unwrap();
    assert_eq!(reconcile.deleted, vec!["stale.txt"]);
    assert_eq!(reconcile.failures.len(), 1);
    assert!(matches!(
        reconcile.failures[0].error,
        SyncError::ReconcileDelete { .. }
    ));
    assert_eq!(report.summary().delete_failures, 1);
}

#[test]
fn test_scan_failure_aborts_cycle_without_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FaultyStore::new());
    store.inner.insert_object("remote.txt", b"x".to_vec(), None, "e");

    let err = engine(test_config(&dir.path().join("missing")), store.clone())
        .run_cycle()
        .unwrap_err();

    assert!(matches!(err, SyncError::Scan { .. }));
    assert_eq!(err.scope(), ErrorScope::Cycle);
    assert_eq!(store.deletes(), 0);
    assert!(store.inner.contains("remote.txt"));
}

#[test]
fn test_multipart_failure_leaves_no_object() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "big.bin", &[1u8; 4096]);
    let store = Arc::new(FaultyStore::new());
    store.fail_put("big.bin");

    let mut config = test_config(dir.path());
    config.multipart_threshold = 1024;
    config.part_size = 1024;
    let report = engine(config, store.clone()).run_cycle().unwrap();

    assert_eq!(report.uploads.failures.len(), 1);
    assert!(matches!(
        &report.uploads.failures[0].error,
        SyncError::Upload {
            source: StoreError::Request { op: "multipart_put", .. },
            ..
        }
    ));
    assert!(!store.inner.contains("big.bin"));
}

#[test]
fn test_summary_lists_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "bad.txt", b"bad");
    let store = Arc::new(FaultyStore::new());
    store.fail_put("bad.txt");

    let report = engine(test_config(dir.path()), store.clone()).run_cycle().unwrap();
    let summary = report.summary();

    assert!(!summary.success);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].key, "bad.txt");
    assert!(summary.failures[0].error.contains("access denied"));
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_aborts_cycle_without_deletes() {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "keep.txt", b"keep");
    write_file(dir.path(), "locked/inner.txt", b"inner");
    let locked = dir.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Permission bits do not apply (running as root).
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let store = Arc::new(FaultyStore::new());
    store.inner.insert_object("locked/inner.txt", b"inner".to_vec(), None, "e");

    let result = engine(test_config(dir.path()), store.clone()).run_cycle();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(result, Err(SyncError::Scan { .. })));
    assert_eq!(store.deletes(), 0);
    assert!(store.inner.contains("locked/inner.txt"));
}
