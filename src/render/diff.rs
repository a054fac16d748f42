use std::collections::BTreeMap;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::pretty_value;
use crate::KeyChange;
use crate::RecordValue;
use crate::Result;
use crate::SystemError;

/// Shows the difference between the `a/` and `b/` trees under a directory.
pub trait DiffRenderer {
    fn render(
        &self,
        root: &Path,
    ) -> Result<()>;
}

/// Runs `git diff --no-index -- a b` in the tree root.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitDiffRenderer;

impl DiffRenderer for GitDiffRenderer {
    fn render(
        &self,
        root: &Path,
    ) -> Result<()> {
        let status = Command::new("git")
            .args(["diff", "--no-index", "--", "a", "b"])
            .current_dir(root)
            .status()
            .map_err(|source| SystemError::ExternalToolUnavailable {
                program: "git".to_string(),
                source,
            })?;
        // 1 means a difference was found.
        match status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(SystemError::ExternalTool {
                program: "git diff".to_string(),
                status,
            }
            .into()),
        }
    }
}

/// Relative file path mirroring `key`.
///
/// Empty, `.` and `..` segments are dropped so every key stays inside its
/// tree.
pub fn key_path(key: &[u8]) -> PathBuf {
    let key = String::from_utf8_lossy(key);
    let path: PathBuf = key
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(Path::new)
        .filter(|segment| matches!(segment.components().next(), Some(Component::Normal(_))))
        .collect();
    if path.as_os_str().is_empty() {
        PathBuf::from("_")
    } else {
        path
    }
}

fn tree_error(path: &Path) -> impl FnOnce(std::io::Error) -> SystemError + '_ {
    move |source| SystemError::DiffTree {
        path: path.to_path_buf(),
        source,
    }
}

fn write_tree_file(
    root: &Path,
    tree: &str,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    let path = root.join(tree).join(key_path(key));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(tree_error(parent))?;
    }
    fs::write(&path, pretty_value(value)).map_err(tree_error(&path))?;
    Ok(())
}

/// Fails when two keys would share a file, or when one key's file would have
/// to be another key's directory.
fn check_key_paths(changes: &[KeyChange]) -> Result<()> {
    let collision = |key: &[u8], other: &[u8]| SystemError::DiffPathCollision {
        key: String::from_utf8_lossy(key).into_owned(),
        other: String::from_utf8_lossy(other).into_owned(),
    };

    let mut paths: BTreeMap<PathBuf, &[u8]> = BTreeMap::new();
    for change in changes {
        let key = change.key.as_slice();
        if let Some(other) = paths.insert(key_path(key), key) {
            if other != key {
                return Err(collision(key, other).into());
            }
        }
    }
    for (path, key) in &paths {
        if let Some(other) = path.ancestors().skip(1).find_map(|dir| paths.get(dir)) {
            return Err(collision(*key, *other).into());
        }
    }
    Ok(())
}

/// Writes `a/<key>` with the old value and `b/<key>` with the new one.
///
/// A created key has no `a/` file and a deleted key has no `b/` file.
pub fn materialize_diff_trees(
    root: &Path,
    changes: &[KeyChange],
) -> Result<()> {
    check_key_paths(changes)?;
    for tree in ["a", "b"] {
        let dir = root.join(tree);
        fs::create_dir_all(&dir).map_err(tree_error(&dir))?;
    }
    for change in changes {
        if let Some(RecordValue::Put(old)) = &change.old {
            write_tree_file(root, "a", &change.key, old)?;
        }
        if let RecordValue::Put(new) = &change.new {
            write_tree_file(root, "b", &change.key, new)?;
        }
    }
    Ok(())
}

/// Materializes `changes` in a temporary directory and renders the diff.
pub fn render_show(
    changes: &[KeyChange],
    renderer: &dyn DiffRenderer,
) -> Result<()> {
    let dir = tempfile::Builder::new()
        .prefix("etx-")
        .tempdir()
        .map_err(tree_error(&std::env::temp_dir()))?;
    materialize_diff_trees(dir.path(), changes)?;
    debug!("diff trees written to {:?}", dir.path());
    renderer.render(dir.path())
}
