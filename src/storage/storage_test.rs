use tracing_test::traced_test;

use super::*;
use crate::test_utils::all_records;
use crate::test_utils::temp_sled_store;
use crate::test_utils::temp_sqlite_store;
use crate::test_utils::timed_revisions;
use crate::Event;

fn put(value: &str) -> RecordValue {
    RecordValue::Put(value.as_bytes().to_vec())
}

fn sample_batch() -> WriteBatch {
    WriteBatch::from_events(
        &[
            Event::put("/a", "x", 1),
            Event::put("/b", "1", 2),
            Event::put("/a", "y", 3).with_prev_kv("x", 1),
            Event::delete("/b", 5),
        ],
        1_000,
    )
}

fn check_idempotent_apply<S: RevisionStore + ?Sized>(store: &S) {
    let batch = sample_batch();

    let first = store.apply_batch(&batch).unwrap();
    assert_eq!(first.records_inserted, 4);
    assert_eq!(first.times_inserted, 4);
    let after_first = all_records(store);

    let second = store.apply_batch(&batch).unwrap();
    assert_eq!(second, BatchOutcome::default());
    assert_eq!(all_records(store), after_first);
    assert_eq!(timed_revisions(store), vec![5, 3, 2, 1]);
}

fn check_prior_value_lookup<S: RevisionStore + ?Sized>(store: &S) {
    for (rev, value) in [(2, "v2"), (5, "v5"), (9, "v9")] {
        assert!(store.put_if_absent(b"/k", &put(value), rev).unwrap());
    }
    // A longer key sharing the prefix must not leak into "/k".
    assert!(store.put_if_absent(b"/k2", &put("other"), 7).unwrap());

    assert_eq!(store.value_before(b"/k", 2).unwrap(), None);
    assert_eq!(store.value_before(b"/k", 3).unwrap().unwrap().mod_revision, 2);
    assert_eq!(store.value_before(b"/k", 5).unwrap().unwrap().mod_revision, 2);
    assert_eq!(store.value_before(b"/k", 8).unwrap().unwrap().value, put("v5"));
    assert_eq!(store.value_before(b"/k", 100).unwrap().unwrap().mod_revision, 9);
    assert_eq!(store.value_before(b"/missing", 100).unwrap(), None);
}

fn check_changes_and_times<S: RevisionStore + ?Sized>(store: &S) {
    assert_eq!(store.max_revision().unwrap(), 0);
    store.apply_batch(&sample_batch()).unwrap();

    assert_eq!(store.max_revision().unwrap(), 5);
    assert_eq!(
        store.changes_at(3).unwrap(),
        vec![HistoryRecord {
            key: b"/a".to_vec(),
            value: put("y"),
            mod_revision: 3,
        }]
    );
    assert_eq!(store.changes_at(5).unwrap()[0].value, RecordValue::Tombstone);
    assert!(store.changes_at(4).unwrap().is_empty());
    assert_eq!(store.revision_time(3).unwrap(), Some(1_000));
    assert_eq!(store.revision_time(4).unwrap(), None);

    // First observation wins.
    assert!(!store.record_revision_time(3, 2_000).unwrap());
    assert_eq!(store.revision_time(3).unwrap(), Some(1_000));
    store.flush().unwrap();
}

fn check_descending_scan<S: RevisionStore + ?Sized>(store: &S) {
    for rev in [1, 2, 3, 7, 8, 20] {
        store.put_if_absent(b"/x", &put("v"), rev).unwrap();
        store.put_if_absent(b"/y", &put("v"), rev).unwrap();
    }
    let revisions: Vec<_> = RevisionsDescending::with_page_size(store, 2)
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(revisions, vec![20, 8, 7, 3, 2, 1]);
    assert_eq!(store.revisions_below(Some(7), 10).unwrap(), vec![3, 2, 1]);
    assert_eq!(store.revisions_below(None, 1).unwrap(), vec![20]);
}

fn check_changes_with_previous<S: RevisionStore + ?Sized>(store: &S) {
    store.apply_batch(&sample_batch()).unwrap();

    let pairs = store.changes_with_previous(3).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.value, put("y"));
    assert_eq!(pairs[0].1.as_ref().unwrap().value, put("x"));
    assert_eq!(pairs[0].1.as_ref().unwrap().mod_revision, 1);

    let pairs = store.changes_with_previous(5).unwrap();
    assert_eq!(pairs[0].0.value, RecordValue::Tombstone);
    assert_eq!(pairs[0].1.as_ref().unwrap().value, put("1"));
    assert_eq!(store.changes_with_previous(1).unwrap()[0].1, None);
    assert!(store.changes_with_previous(4).unwrap().is_empty());
}

fn check_backfill_watermark<S: RevisionStore + ?Sized>(store: &S) {
    assert_eq!(store.backfill_watermark().unwrap(), 0);
    store.record_backfill_watermark(30).unwrap();
    store.record_backfill_watermark(10).unwrap();
    assert_eq!(store.backfill_watermark().unwrap(), 30);
    store.record_backfill_watermark(31).unwrap();
    assert_eq!(store.backfill_watermark().unwrap(), 31);
}

#[test]
#[traced_test]
fn test_sqlite_apply_batch_is_idempotent() {
    let (store, _dir) = temp_sqlite_store();
    check_idempotent_apply(store.as_ref());
}

#[test]
#[traced_test]
fn test_sled_apply_batch_is_idempotent() {
    let (store, _dir) = temp_sled_store();
    check_idempotent_apply(store.as_ref());
}

#[test]
fn test_sqlite_value_before_returns_greatest_prior_revision() {
    let (store, _dir) = temp_sqlite_store();
    check_prior_value_lookup(store.as_ref());
}

#[test]
fn test_sled_value_before_returns_greatest_prior_revision() {
    let (store, _dir) = temp_sled_store();
    check_prior_value_lookup(store.as_ref());
}

#[test]
fn test_sqlite_changes_and_revision_times() {
    let (store, _dir) = temp_sqlite_store();
    check_changes_and_times(store.as_ref());
}

#[test]
fn test_sled_changes_and_revision_times() {
    let (store, _dir) = temp_sled_store();
    check_changes_and_times(store.as_ref());
}

#[test]
fn test_sqlite_distinct_revisions_descending_pages() {
    let (store, _dir) = temp_sqlite_store();
    check_descending_scan(store.as_ref());
}

#[test]
fn test_sled_distinct_revisions_descending_pages() {
    let (store, _dir) = temp_sled_store();
    check_descending_scan(store.as_ref());
}

#[test]
fn test_sqlite_changes_with_previous() {
    let (store, _dir) = temp_sqlite_store();
    check_changes_with_previous(store.as_ref());
}

#[test]
fn test_sled_changes_with_previous() {
    let (store, _dir) = temp_sled_store();
    check_changes_with_previous(store.as_ref());
}

#[test]
fn test_sqlite_backfill_watermark_only_rises() {
    let (store, _dir) = temp_sqlite_store();
    check_backfill_watermark(store.as_ref());
}

#[test]
fn test_sled_backfill_watermark_only_rises() {
    let (store, _dir) = temp_sled_store();
    check_backfill_watermark(store.as_ref());
}

#[test]
fn test_empty_store_scan_is_empty() {
    let store = SqliteRevisionStore::open_in_memory().unwrap();
    assert_eq!(distinct_revisions_descending(&store).count(), 0);
}

#[test]
fn test_scan_stops_after_store_error() {
    let mut store = MockRevisionStore::new();
    store
        .expect_revisions_below()
        .times(1)
        .returning(|_, _| Err(crate::StorageError::Transaction("boom".into()).into()));

    let mut scan = distinct_revisions_descending(&store);
    assert!(scan.next().unwrap().is_err());
    assert!(scan.next().is_none());
}

#[test]
fn test_open_revision_store_picks_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StorageConfig {
        path: dir.path().join("etx.db"),
        ..Default::default()
    };
    let store = open_revision_store(&config, OpenMode::ReadWrite).unwrap();
    assert_eq!(store.max_revision().unwrap(), 0);
    drop(store);

    config.engine = StorageEngine::Sled;
    config.path = dir.path().join("etx.sled");
    let store = open_revision_store(&config, OpenMode::ReadWrite).unwrap();
    store.put_if_absent(b"/a", &put("x"), 4).unwrap();
    assert_eq!(store.max_revision().unwrap(), 4);
}

#[test]
fn test_read_only_sled_store_requires_existing_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        engine: StorageEngine::Sled,
        path: dir.path().join("missing.sled"),
        ..Default::default()
    };
    assert!(open_revision_store(&config, OpenMode::ReadOnly).is_err());
    assert!(!config.path.exists());
}
