//! Sled-backed revision store.
//!
//! Three trees mirror the relational layout:
//! - `history`: `history_key(key, revision) -> bincode(RecordValue)`
//! - `history_by_revision`: `revision_key(revision) ++ key -> ()`
//! - `revtime`: `revision_key(revision) -> watch_time`
//! - `meta`: `name -> i64` (the backfill watermark)
//!
//! sled holds an exclusive file lock, so unlike the SQLite store a second
//! process cannot read the database while `watch` is running.

use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionError;
use sled::Transactional;
use sled::Tree;
use tracing::debug;
use tracing::instrument;
use tracing::trace;

use crate::constants::BACKFILL_WATERMARK;
use crate::constants::HISTORY_BY_REVISION_TREE;
use crate::constants::HISTORY_TREE;
use crate::constants::META_TREE;
use crate::constants::REVTIME_TREE;
use crate::convert::history_key;
use crate::convert::history_key_prefix;
use crate::convert::i64_from_key;
use crate::convert::i64_key;
use crate::convert::revision_from_key;
use crate::convert::revision_index_key;
use crate::convert::revision_key;
use crate::convert::split_revision_index_key;
use crate::BatchOutcome;
use crate::Error;
use crate::HistoryRecord;
use crate::RecordValue;
use crate::Result;
use crate::Revision;
use crate::RevisionStore;
use crate::StorageError;
use crate::WriteBatch;

/// One history row, encoded and ready to be written.
struct EncodedRecord {
    history_key: Vec<u8>,
    index_key: Vec<u8>,
    value: Vec<u8>,
}

impl EncodedRecord {
    fn new(
        key: &[u8],
        value: &RecordValue,
        revision: Revision,
    ) -> Result<Self> {
        Ok(Self {
            history_key: history_key(key, revision),
            index_key: revision_index_key(revision, key),
            value: bincode::serialize(value)?,
        })
    }
}

pub struct SledRevisionStore {
    db: sled::Db,
    history: Tree,
    by_revision: Tree,
    revtime: Tree,
    meta: Tree,
}

impl std::fmt::Debug for SledRevisionStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledRevisionStore")
            .field("history_len", &self.history.len())
            .field("revtime_len", &self.revtime.len())
            .finish()
    }
}

impl SledRevisionStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        let history = db.open_tree(HISTORY_TREE)?;
        let by_revision = db.open_tree(HISTORY_BY_REVISION_TREE)?;
        let revtime = db.open_tree(REVTIME_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        debug!(
            "sled revision store opened: {} history rows, {} revisions timed",
            history.len(),
            revtime.len()
        );
        Ok(Self {
            db,
            history,
            by_revision,
            revtime,
            meta,
        })
    }

    /// Writes `records` and `times` atomically across the three trees,
    /// skipping every row whose key already exists.
    fn insert_absent(
        &self,
        records: &[EncodedRecord],
        times: &[([u8; 8], [u8; 8])],
    ) -> Result<BatchOutcome> {
        (&self.history, &self.by_revision, &self.revtime)
            .transaction(|(history, by_revision, revtime)| {
                let mut outcome = BatchOutcome::default();
                for record in records {
                    if history.get(&record.history_key)?.is_some() {
                        continue;
                    }
                    history.insert(record.history_key.as_slice(), record.value.as_slice())?;
                    by_revision.insert(record.index_key.as_slice(), &[] as &[u8])?;
                    outcome.records_inserted += 1;
                }
                for (revision, time) in times {
                    if revtime.get(revision)?.is_some() {
                        continue;
                    }
                    revtime.insert(&revision[..], &time[..])?;
                    outcome.times_inserted += 1;
                }
                Ok::<_, ConflictableTransactionError<()>>(outcome)
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => {
                    Error::from(StorageError::Transaction("history write aborted".into()))
                }
                TransactionError::Storage(e) => e.into(),
            })
    }

    fn decode_record(
        key: Vec<u8>,
        revision: Revision,
        bytes: &[u8],
    ) -> Result<HistoryRecord> {
        let value: RecordValue = bincode::deserialize(bytes)?;
        Ok(HistoryRecord {
            key,
            value,
            mod_revision: revision,
        })
    }
}

impl RevisionStore for SledRevisionStore {
    fn put_if_absent(
        &self,
        key: &[u8],
        value: &RecordValue,
        revision: Revision,
    ) -> Result<bool> {
        let record = EncodedRecord::new(key, value, revision)?;
        let outcome = self.insert_absent(std::slice::from_ref(&record), &[])?;
        Ok(outcome.records_inserted > 0)
    }

    fn record_revision_time(
        &self,
        revision: Revision,
        watch_time: i64,
    ) -> Result<bool> {
        let outcome = self.insert_absent(&[], &[(revision_key(revision), i64_key(watch_time))])?;
        Ok(outcome.times_inserted > 0)
    }

    #[instrument(skip(self, batch), fields(len = batch.len()))]
    fn apply_batch(
        &self,
        batch: &WriteBatch,
    ) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let records = batch
            .records()
            .iter()
            .map(|r| EncodedRecord::new(&r.key, &r.value, r.mod_revision))
            .collect::<Result<Vec<_>>>()?;
        let times: Vec<_> = batch
            .revision_times()
            .map(|ts| (revision_key(ts.mod_revision), i64_key(ts.watch_time)))
            .collect();

        let outcome = self.insert_absent(&records, &times)?;
        debug!(?outcome, "batch committed");
        Ok(outcome)
    }

    fn max_revision(&self) -> Result<Revision> {
        match self.by_revision.last()? {
            Some((k, _)) => Ok(split_revision_index_key(&k)?.0),
            None => Ok(0),
        }
    }

    fn revisions_below(
        &self,
        upper: Option<Revision>,
        limit: usize,
    ) -> Result<Vec<Revision>> {
        let iter = match upper {
            Some(upper) => self.by_revision.range(..revision_key(upper)),
            None => self.by_revision.iter(),
        };

        let mut revisions: Vec<Revision> = Vec::new();
        for item in iter.rev() {
            if revisions.len() >= limit {
                break;
            }
            let (k, _) = item?;
            let (revision, _) = split_revision_index_key(&k)?;
            if revisions.last() != Some(&revision) {
                revisions.push(revision);
            }
        }
        Ok(revisions)
    }

    #[instrument(skip(self))]
    fn changes_at(
        &self,
        revision: Revision,
    ) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::new();
        for item in self.by_revision.scan_prefix(revision_key(revision)) {
            let (k, _) = item?;
            let (_, key) = split_revision_index_key(&k)?;
            match self.history.get(history_key(&key, revision))? {
                Some(bytes) => records.push(Self::decode_record(key, revision, &bytes)?),
                None => trace!(?key, revision, "index entry without history row"),
            }
        }
        Ok(records)
    }

    fn value_before(
        &self,
        key: &[u8],
        revision: Revision,
    ) -> Result<Option<HistoryRecord>> {
        let start = history_key_prefix(key);
        let end = history_key(key, revision);
        match self.history.range(start.clone()..end).next_back() {
            Some(item) => {
                let (k, v) = item?;
                let found = revision_from_key(&k[start.len()..])?;
                Ok(Some(Self::decode_record(key.to_vec(), found, &v)?))
            }
            None => Ok(None),
        }
    }

    fn revision_time(
        &self,
        revision: Revision,
    ) -> Result<Option<i64>> {
        match self.revtime.get(revision_key(revision))? {
            Some(v) => Ok(Some(i64_from_key(&v)?)),
            None => Ok(None),
        }
    }

    fn backfill_watermark(&self) -> Result<Revision> {
        match self.meta.get(BACKFILL_WATERMARK)? {
            Some(v) => Ok(i64_from_key(&v)?),
            None => Ok(0),
        }
    }

    fn record_backfill_watermark(
        &self,
        revision: Revision,
    ) -> Result<()> {
        // The backfill task is the only writer of the entry.
        if revision > self.backfill_watermark()? {
            self.meta.insert(BACKFILL_WATERMARK, &i64_key(revision)[..])?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let bytes = self.db.flush()?;
        trace!("sled flushed {} bytes", bytes);
        Ok(())
    }
}
