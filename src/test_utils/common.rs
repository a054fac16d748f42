use std::sync::Arc;

use tempfile::TempDir;

use crate::distinct_revisions_descending;
use crate::init_sled_history_db;
use crate::HistoryRecord;
use crate::OpenMode;
use crate::Revision;
use crate::RevisionStore;
use crate::SledRevisionStore;
use crate::SqliteRevisionStore;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub(crate) fn temp_sqlite_store() -> (Arc<SqliteRevisionStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRevisionStore::open(&dir.path().join("etx.db"), OpenMode::ReadWrite, 1000)
        .unwrap();
    (Arc::new(store), dir)
}

pub(crate) fn temp_sled_store() -> (Arc<SledRevisionStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = init_sled_history_db(dir.path().join("etx.sled"), 8 * 1024 * 1024).unwrap();
    (Arc::new(SledRevisionStore::new(db).unwrap()), dir)
}

/// Every record of `store`, revisions descending and keys ascending.
pub(crate) fn all_records<S: RevisionStore + ?Sized>(store: &S) -> Vec<HistoryRecord> {
    let mut records = Vec::new();
    for rev in distinct_revisions_descending(store) {
        records.extend(store.changes_at(rev.unwrap()).unwrap());
    }
    records
}

/// Revisions of `store` that carry an observation time.
pub(crate) fn timed_revisions<S: RevisionStore + ?Sized>(store: &S) -> Vec<Revision> {
    distinct_revisions_descending(store)
        .map(|rev| rev.unwrap())
        .filter(|rev| store.revision_time(*rev).unwrap().is_some())
        .collect()
}
