use rusqlite::Connection;
use tempfile::TempDir;

use super::*;
use crate::Error;
use crate::HistoryRecord;
use crate::OpenMode;
use crate::RecordValue;
use crate::RevisionStore;
use crate::StorageError;
use crate::SystemError;
use crate::WriteBatch;

fn legacy_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("legacy.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "create table history (
            key text not null, value text not null, mod_revision integer not null,
            primary key (key, mod_revision));
         create table revtime (mod_revision integer not null primary key, watch_time integer not null);
         insert into history values (cast('/a' as blob), cast('x' as blob), 1);
         insert into history values (cast('/a' as blob), cast('y' as blob), 3);
         insert into revtime values (1, 100);
         insert into revtime values (3, 300);",
    )
    .unwrap();
    path
}

#[test]
fn test_read_only_open_rejects_uninitialised_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("create table unrelated (x integer);")
        .unwrap();

    let err = SqliteRevisionStore::open(&path, OpenMode::ReadOnly, 100).unwrap_err();
    assert!(matches!(
        err,
        Error::System(SystemError::Storage(StorageError::Uninitialized(_)))
    ));
}

#[test]
fn test_read_only_open_of_missing_file_fails_without_creating_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("missing.db");

    assert!(SqliteRevisionStore::open(&path, OpenMode::ReadOnly, 100).is_err());
    assert!(!path.exists());
}

#[test]
fn test_read_write_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a").join("b").join("etx.db");

    let store = SqliteRevisionStore::open(&path, OpenMode::ReadWrite, 100).unwrap();
    assert_eq!(store.max_revision().unwrap(), 0);
    assert!(path.exists());
}

#[test]
fn test_legacy_file_is_readable_without_migration() {
    let dir = tempfile::tempdir().unwrap();
    let path = legacy_file(&dir);

    let store = SqliteRevisionStore::open(&path, OpenMode::ReadOnly, 100).unwrap();
    assert_eq!(store.max_revision().unwrap(), 3);
    assert_eq!(
        store.value_before(b"/a", 3).unwrap(),
        Some(HistoryRecord {
            key: b"/a".to_vec(),
            value: RecordValue::Put(b"x".to_vec()),
            mod_revision: 1,
        })
    );
    assert_eq!(store.revision_time(3).unwrap(), Some(300));
    assert_eq!(store.backfill_watermark().unwrap(), 0);
    assert_eq!(
        store.changes_with_previous(3).unwrap(),
        vec![(
            HistoryRecord {
                key: b"/a".to_vec(),
                value: RecordValue::Put(b"y".to_vec()),
                mod_revision: 3,
            },
            Some(HistoryRecord {
                key: b"/a".to_vec(),
                value: RecordValue::Put(b"x".to_vec()),
                mod_revision: 1,
            })
        )]
    );
}

#[test]
fn test_legacy_file_is_migrated_on_read_write_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = legacy_file(&dir);

    let store = SqliteRevisionStore::open(&path, OpenMode::ReadWrite, 100).unwrap();
    assert!(store.put_if_absent(b"/a", &RecordValue::Tombstone, 4).unwrap());
    assert_eq!(store.changes_at(4).unwrap()[0].value, RecordValue::Tombstone);
    assert_eq!(
        store.changes_at(3).unwrap()[0].value,
        RecordValue::Put(b"y".to_vec())
    );
    drop(store);

    let conn = Connection::open(&path).unwrap();
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 3);
    assert!(migration::table_exists(&conn, "meta").unwrap());
}

#[test]
fn test_newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    {
        let store = SqliteRevisionStore::open(&path, OpenMode::ReadWrite, 100).unwrap();
        store.flush().unwrap();
    }
    Connection::open(&path)
        .unwrap()
        .pragma_update(None, "user_version", 99)
        .unwrap();

    for mode in [OpenMode::ReadWrite, OpenMode::ReadOnly] {
        let err = SqliteRevisionStore::open(&path, mode, 100).unwrap_err();
        assert!(matches!(
            err,
            Error::System(SystemError::Storage(StorageError::SchemaVersionMismatch {
                expected: 3,
                got: 99
            }))
        ));
    }
}

#[test]
fn test_reader_sees_committed_batches_of_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("etx.db");
    let writer = SqliteRevisionStore::open(&path, OpenMode::ReadWrite, 100).unwrap();
    let reader = SqliteRevisionStore::open(&path, OpenMode::ReadOnly, 100).unwrap();

    let mut batch = WriteBatch::new();
    batch.insert(b"/a".to_vec(), RecordValue::Put(b"x".to_vec()), 7, 42);
    writer.apply_batch(&batch).unwrap();

    assert_eq!(reader.max_revision().unwrap(), 7);
    assert_eq!(reader.revision_time(7).unwrap(), Some(42));
    // Flushing a read-only store is a no-op.
    reader.flush().unwrap();
}

#[test]
fn test_binary_keys_round_trip() {
    let store = SqliteRevisionStore::open_in_memory().unwrap();
    let key = vec![0x00, 0xFF, 0x2F];
    store
        .put_if_absent(&key, &RecordValue::Put(vec![0xFE]), 1)
        .unwrap();
    assert_eq!(store.changes_at(1).unwrap()[0].key, key);
}

#[test]
fn test_backfill_watermark_only_rises_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("etx.db");
    {
        let store = SqliteRevisionStore::open(&path, OpenMode::ReadWrite, 100).unwrap();
        assert_eq!(store.backfill_watermark().unwrap(), 0);
        store.record_backfill_watermark(12).unwrap();
        store.record_backfill_watermark(4).unwrap();
        assert_eq!(store.backfill_watermark().unwrap(), 12);
    }

    let reader = SqliteRevisionStore::open(&path, OpenMode::ReadOnly, 100).unwrap();
    assert_eq!(reader.backfill_watermark().unwrap(), 12);
}
