//! Default locations of the history store.

use std::env;
use std::path::PathBuf;

/// Per-user data directory.
///
/// macOS: `$HOME/Library/Application Support`; elsewhere `$XDG_DATA_HOME`,
/// falling back to `$HOME/.local/share`.
pub fn user_data_dir() -> Option<PathBuf> {
    let home = env::var("HOME").ok().filter(|s| !s.is_empty()).map(PathBuf::from);

    if cfg!(target_os = "macos") {
        return home.map(|h| h.join("Library").join("Application Support"));
    }

    env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| home.map(|h| h.join(".local").join("share")))
}

/// `<data dir>/etx/etx.db`, or an empty path when no data directory can be
/// found; an empty path fails validation with "file not defined".
pub fn default_db_path() -> PathBuf {
    user_data_dir()
        .map(|dir| dir.join("etx").join("etx.db"))
        .unwrap_or_default()
}
