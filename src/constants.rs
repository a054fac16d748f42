// -
// Database namespaces

/// Sled database tree namespaces
pub(crate) const HISTORY_TREE: &str = "history";
pub(crate) const HISTORY_BY_REVISION_TREE: &str = "history_by_revision";
pub(crate) const REVTIME_TREE: &str = "revtime";
pub(crate) const META_TREE: &str = "meta";

/// Name of the backfill watermark entry in the metadata tree/table
pub(crate) const BACKFILL_WATERMARK: &str = "backfill_watermark";

/// SQLite schema version stored in `PRAGMA user_version`
pub(crate) const SQLITE_SCHEMA_VERSION: i64 = 3;

/// Page size used when scanning distinct revisions
pub(crate) const REVISION_SCAN_PAGE_SIZE: usize = 1024;

/// Upper bound on a single line of the watch stream (64 MiB)
pub(crate) const MAX_WATCH_LINE_BYTES: usize = 64 * 1024 * 1024;

/// etcd v3 JSON gateway watch endpoint
pub(crate) const WATCH_PATH: &str = "/v3/watch";
