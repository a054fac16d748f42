//! SQLite-backed revision store.
//!
//! Layout: `history(key, value, mod_revision, tombstone)` keyed by
//! `(key, mod_revision)` and `revtime(mod_revision, watch_time)` keyed by
//! `mod_revision`, plus a `meta(name, value)` table for the backfill
//! watermark. The database runs in WAL mode, so a `log` or `show` in
//! another process reads a consistent snapshot while `watch` keeps writing.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::params;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::TransactionBehavior;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::migration;
use crate::constants::BACKFILL_WATERMARK;
use crate::constants::SQLITE_SCHEMA_VERSION;
use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::BatchOutcome;
use crate::HistoryRecord;
use crate::OpenMode;
use crate::RecordValue;
use crate::Result;
use crate::Revision;
use crate::RevisionStore;
use crate::StorageError;
use crate::WriteBatch;

const INSERT_HISTORY: &str = "insert or ignore into history (key, value, mod_revision, tombstone) \
                              values (?1, ?2, ?3, ?4)";
const INSERT_REVTIME: &str =
    "insert or ignore into revtime (mod_revision, watch_time) values (?1, ?2)";
const RAISE_META: &str = "insert into meta (name, value) values (?1, ?2) \
                          on conflict (name) do update set value = max(value, excluded.value)";

pub struct SqliteRevisionStore {
    conn: Mutex<Connection>,
    mode: OpenMode,
    /// Files written before tombstones existed lack the column; they can
    /// still be read.
    has_tombstones: bool,
    /// Read-only opens of version 2 files have no `meta` table.
    has_meta: bool,
}

impl std::fmt::Debug for SqliteRevisionStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SqliteRevisionStore")
            .field("mode", &self.mode)
            .field("has_tombstones", &self.has_tombstones)
            .field("has_meta", &self.has_meta)
            .finish()
    }
}

impl SqliteRevisionStore {
    /// Opens the store at `path`.
    ///
    /// `ReadWrite` creates the file and its parent directory when missing and
    /// migrates the schema. `ReadOnly` refuses files that were never
    /// initialised.
    pub fn open(
        path: &Path,
        mode: OpenMode,
        busy_timeout_ms: u64,
    ) -> Result<Self> {
        let mut conn = match mode {
            OpenMode::ReadWrite => {
                create_parent_dir_if_not_exist(path)?;
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                let journal: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                if !journal.eq_ignore_ascii_case("wal") {
                    warn!(?path, journal, "WAL mode unavailable, readers may block");
                }
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn
            }
            OpenMode::ReadOnly => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;

        match mode {
            OpenMode::ReadWrite => migration::migrate(&mut conn)?,
            OpenMode::ReadOnly => {
                if !migration::table_exists(&conn, "history")?
                    || !migration::table_exists(&conn, "revtime")?
                {
                    return Err(StorageError::Uninitialized(path.display().to_string()).into());
                }
                let version = migration::schema_version(&conn)?;
                if version > SQLITE_SCHEMA_VERSION {
                    return Err(StorageError::SchemaVersionMismatch {
                        expected: SQLITE_SCHEMA_VERSION,
                        got: version,
                    }
                    .into());
                }
            }
        }
        let has_tombstones = migration::column_exists(&conn, "history", "tombstone")?;
        let has_meta = migration::table_exists(&conn, "meta")?;
        debug!(?path, ?mode, has_tombstones, has_meta, "sqlite revision store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            mode,
            has_tombstones,
            has_meta,
        })
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            mode: OpenMode::ReadWrite,
            has_tombstones: true,
            has_meta: true,
        })
    }

    fn tombstone_column(&self) -> &'static str {
        if self.has_tombstones {
            "tombstone"
        } else {
            "0"
        }
    }

    fn select_changes_at(
        &self,
        conn: &Connection,
        revision: Revision,
    ) -> Result<Vec<HistoryRecord>> {
        let mut stmt = conn.prepare_cached(&format!(
            "select key, value, {} from history where mod_revision = ?1 order by key",
            self.tombstone_column()
        ))?;
        let rows = stmt.query_map(params![revision], |row| {
            Self::read_record(row, Some(revision))
        })?;
        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    fn select_value_before(
        &self,
        conn: &Connection,
        key: &[u8],
        revision: Revision,
    ) -> Result<Option<HistoryRecord>> {
        let record = conn
            .prepare_cached(&format!(
                "select key, value, {}, mod_revision from history \
                 where key = ?1 and mod_revision < ?2 \
                 order by mod_revision desc limit 1",
                self.tombstone_column()
            ))?
            .query_row(params![key, revision], |row| Self::read_record(row, None))
            .optional()?;
        Ok(record)
    }

    fn read_record(
        row: &Row<'_>,
        revision: Option<Revision>,
    ) -> rusqlite::Result<HistoryRecord> {
        let key = bytes_column(row, 0)?;
        let value = bytes_column(row, 1)?;
        let tombstone: i64 = row.get(2)?;
        let mod_revision = match revision {
            Some(rev) => rev,
            None => row.get(3)?,
        };
        Ok(HistoryRecord {
            key,
            value: if tombstone != 0 {
                RecordValue::Tombstone
            } else {
                RecordValue::Put(value)
            },
            mod_revision,
        })
    }
}

/// Keys and values are written as blobs; older files may hold text.
fn bytes_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Vec<u8>> {
    match row.get_ref(idx)? {
        ValueRef::Blob(b) | ValueRef::Text(b) => Ok(b.to_vec()),
        ValueRef::Null => Ok(Vec::new()),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "bytes".to_string(),
            other.data_type(),
        )),
    }
}

fn value_params(value: &RecordValue) -> (&[u8], i64) {
    match value {
        RecordValue::Put(v) => (v.as_slice(), 0),
        RecordValue::Tombstone => (&[], 1),
    }
}

impl RevisionStore for SqliteRevisionStore {
    fn put_if_absent(
        &self,
        key: &[u8],
        value: &RecordValue,
        revision: Revision,
    ) -> Result<bool> {
        let (bytes, tombstone) = value_params(value);
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached(INSERT_HISTORY)?
            .execute(params![key, bytes, revision, tombstone])?;
        Ok(changed > 0)
    }

    fn record_revision_time(
        &self,
        revision: Revision,
        watch_time: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached(INSERT_REVTIME)?
            .execute(params![revision, watch_time])?;
        Ok(changed > 0)
    }

    #[instrument(skip(self, batch), fields(len = batch.len()))]
    fn apply_batch(
        &self,
        batch: &WriteBatch,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        let mut conn = self.conn.lock();
        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction()?;
        {
            let mut insert_history = tx.prepare_cached(INSERT_HISTORY)?;
            for record in batch.records() {
                let (bytes, tombstone) = value_params(&record.value);
                outcome.records_inserted += insert_history.execute(params![
                    record.key,
                    bytes,
                    record.mod_revision,
                    tombstone
                ])?;
            }
            let mut insert_revtime = tx.prepare_cached(INSERT_REVTIME)?;
            for ts in batch.revision_times() {
                outcome.times_inserted +=
                    insert_revtime.execute(params![ts.mod_revision, ts.watch_time])?;
            }
        }
        tx.commit()?;

        debug!(?outcome, "batch committed");
        Ok(outcome)
    }

    fn max_revision(&self) -> Result<Revision> {
        let conn = self.conn.lock();
        let max = conn.query_row(
            "select ifnull(max(mod_revision), 0) from history",
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn revisions_below(
        &self,
        upper: Option<Revision>,
        limit: usize,
    ) -> Result<Vec<Revision>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "select distinct mod_revision from history \
             where ?1 is null or mod_revision < ?1 \
             order by mod_revision desc limit ?2",
        )?;
        let rows = stmt.query_map(params![upper, limit as i64], |row| row.get(0))?;
        let mut revisions = Vec::new();
        for rev in rows {
            revisions.push(rev?);
        }
        Ok(revisions)
    }

    #[instrument(skip(self))]
    fn changes_at(
        &self,
        revision: Revision,
    ) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn.lock();
        self.select_changes_at(&conn, revision)
    }

    fn value_before(
        &self,
        key: &[u8],
        revision: Revision,
    ) -> Result<Option<HistoryRecord>> {
        let conn = self.conn.lock();
        self.select_value_before(&conn, key, revision)
    }

    #[instrument(skip(self))]
    fn changes_with_previous(
        &self,
        revision: Revision,
    ) -> Result<Vec<(HistoryRecord, Option<HistoryRecord>)>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let mut changes = Vec::new();
        for record in self.select_changes_at(&tx, revision)? {
            let previous = self.select_value_before(&tx, &record.key, revision)?;
            changes.push((record, previous));
        }
        tx.finish()?;
        Ok(changes)
    }

    fn revision_time(
        &self,
        revision: Revision,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let time = conn
            .prepare_cached("select watch_time from revtime where mod_revision = ?1")?
            .query_row(params![revision], |row| row.get(0))
            .optional()?;
        Ok(time)
    }

    fn backfill_watermark(&self) -> Result<Revision> {
        if !self.has_meta {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let watermark = conn
            .prepare_cached("select value from meta where name = ?1")?
            .query_row(params![BACKFILL_WATERMARK], |row| row.get(0))
            .optional()?;
        Ok(watermark.unwrap_or(0))
    }

    fn record_backfill_watermark(
        &self,
        revision: Revision,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(RAISE_META)?
            .execute(params![BACKFILL_WATERMARK, revision])?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let conn = self.conn.lock();
        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(())) {
            warn!("wal checkpoint failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}
