//! Revision Store: durable `(key, revision) -> value` history plus the time at
//! which each revision was observed.
//!
//! Every write is insert-if-absent, so replaying a watch message any number of
//! times leaves the store in the same state as applying it once.
mod adaptors;
mod record;

#[cfg(test)]
mod storage_test;

use std::sync::Arc;

pub use adaptors::*;
#[cfg(test)]
use mockall::automock;
pub use record::*;
use tracing::info;

use crate::constants::REVISION_SCAN_PAGE_SIZE;
use crate::Result;
use crate::Revision;
use crate::StorageConfig;
use crate::StorageError;
use crate::StorageEngine;

#[cfg_attr(test, automock)]
pub trait RevisionStore: Send + Sync + 'static {
    /// Inserts a history record unless `(key, revision)` already exists.
    ///
    /// Returns `false` for a duplicate; a duplicate is never an error.
    fn put_if_absent(
        &self,
        key: &[u8],
        value: &RecordValue,
        revision: Revision,
    ) -> Result<bool>;

    /// Inserts the observation time of `revision` unless already present.
    fn record_revision_time(
        &self,
        revision: Revision,
        watch_time: i64,
    ) -> Result<bool>;

    /// Applies every record and timestamp of `batch` in one transaction.
    ///
    /// Either all rows of the batch become visible or none do.
    fn apply_batch(
        &self,
        batch: &WriteBatch,
    ) -> Result<BatchOutcome>;

    /// Highest recorded revision, or 0 for an empty store.
    fn max_revision(&self) -> Result<Revision>;

    /// Up to `limit` distinct revisions strictly below `upper` (no bound when
    /// `None`), highest first.
    fn revisions_below(
        &self,
        upper: Option<Revision>,
        limit: usize,
    ) -> Result<Vec<Revision>>;

    /// Every record written at exactly `revision`, keys ascending.
    fn changes_at(
        &self,
        revision: Revision,
    ) -> Result<Vec<HistoryRecord>>;

    /// The record of `key` with the greatest revision strictly below
    /// `revision`.
    fn value_before(
        &self,
        key: &[u8],
        revision: Revision,
    ) -> Result<Option<HistoryRecord>>;

    /// Every record written at `revision` paired with the previous record of
    /// its key, keys ascending.
    ///
    /// Engines with transactions answer from a single read snapshot.
    fn changes_with_previous(
        &self,
        revision: Revision,
    ) -> Result<Vec<(HistoryRecord, Option<HistoryRecord>)>> {
        self.changes_at(revision)?
            .into_iter()
            .map(|record| {
                let previous = self.value_before(&record.key, revision)?;
                Ok((record, previous))
            })
            .collect()
    }

    /// Observation time of `revision` in nanoseconds since the UNIX epoch.
    fn revision_time(
        &self,
        revision: Revision,
    ) -> Result<Option<i64>>;

    /// Highest revision below which every gap has been proven by a backfill
    /// replay, or 0 when none has.
    fn backfill_watermark(&self) -> Result<Revision>;

    /// Raises the backfill watermark to `revision`. A lower value is ignored.
    fn record_backfill_watermark(
        &self,
        revision: Revision,
    ) -> Result<()>;

    /// Synchronously persists buffered writes.
    fn flush(&self) -> Result<()>;
}

/// Lazy, finite scan of the distinct revisions of a store, highest first.
///
/// Pages through [`RevisionStore::revisions_below`], so a scan never holds a
/// read transaction open and can be restarted by creating a new one.
pub struct RevisionsDescending<'a, S: ?Sized> {
    store: &'a S,
    page: std::vec::IntoIter<Revision>,
    cursor: Option<Revision>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, S: RevisionStore + ?Sized> RevisionsDescending<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_page_size(store, REVISION_SCAN_PAGE_SIZE)
    }

    pub fn with_page_size(
        store: &'a S,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            page: Vec::new().into_iter(),
            cursor: None,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }
}

impl<S: RevisionStore + ?Sized> Iterator for RevisionsDescending<'_, S> {
    type Item = Result<Revision>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rev) = self.page.next() {
                self.cursor = Some(rev);
                return Some(Ok(rev));
            }
            if self.exhausted {
                return None;
            }
            match self.store.revisions_below(self.cursor, self.page_size) {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    if page.is_empty() {
                        return None;
                    }
                    self.page = page.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Scans the distinct revisions of `store`, highest first.
pub fn distinct_revisions_descending<S: RevisionStore + ?Sized>(
    store: &S
) -> RevisionsDescending<'_, S> {
    RevisionsDescending::new(store)
}

/// How a store is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create and migrate the store if needed; used by the ingestion path
    ReadWrite,
    /// Never create or migrate; used by query commands
    ReadOnly,
}

/// Opens the store configured by `config`.
pub fn open_revision_store(
    config: &StorageConfig,
    mode: OpenMode,
) -> Result<Arc<dyn RevisionStore>> {
    info!(
        "open {:?} revision store at {:?} ({:?})",
        config.engine, config.path, mode
    );
    match config.engine {
        StorageEngine::Sqlite => Ok(Arc::new(SqliteRevisionStore::open(
            &config.path,
            mode,
            config.busy_timeout_ms,
        )?)),
        StorageEngine::Sled => {
            if mode == OpenMode::ReadOnly && !config.path.exists() {
                return Err(StorageError::Uninitialized(config.path.display().to_string()).into());
            }
            let db = init_sled_history_db(&config.path, config.sled_cache_capacity)?;
            Ok(Arc::new(SledRevisionStore::new(db)?))
        }
    }
}
