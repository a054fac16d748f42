//! Schema migrations of the SQLite history store.
//!
//! The schema version lives in `PRAGMA user_version`. Version 1 is the
//! original two-table layout; files created before versioning report 0 but
//! already carry it, which is why every step is idempotent. Version 2 adds
//! tombstones and the revision index, version 3 the `meta` table.

use rusqlite::Connection;
use tracing::info;

use crate::constants::SQLITE_SCHEMA_VERSION;
use crate::Result;
use crate::StorageError;

const V1_HISTORY_AND_REVTIME: &str = "
create table if not exists history (
	key          text    not null,
	value        text    not null,
	mod_revision integer not null,

	primary key (key, mod_revision)
);
create table if not exists revtime (
	mod_revision integer not null primary key,
	watch_time   integer not null
);
";

const V2_INDEX_BY_REVISION: &str = "
create index if not exists history_by_revision on history (mod_revision);
";

const V3_META: &str = "
create table if not exists meta (
	name  text    not null primary key,
	value integer not null
);
";

pub(super) fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

pub(super) fn table_exists(
    conn: &Connection,
    name: &str,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "select count(*) from sqlite_master where type = 'table' and name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(super) fn column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Brings the schema up to [`SQLITE_SCHEMA_VERSION`] in one transaction.
pub(super) fn migrate(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > SQLITE_SCHEMA_VERSION {
        return Err(StorageError::SchemaVersionMismatch {
            expected: SQLITE_SCHEMA_VERSION,
            got: current,
        }
        .into());
    }
    if current == SQLITE_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(V1_HISTORY_AND_REVTIME)?;
    if !column_exists(&tx, "history", "tombstone")? {
        tx.execute_batch("alter table history add column tombstone integer not null default 0;")?;
    }
    tx.execute_batch(V2_INDEX_BY_REVISION)?;
    tx.execute_batch(V3_META)?;
    tx.pragma_update(None, "user_version", SQLITE_SCHEMA_VERSION)?;
    tx.commit()?;

    info!(
        "migrated history schema from version {} to {}",
        current, SQLITE_SCHEMA_VERSION
    );
    Ok(())
}
