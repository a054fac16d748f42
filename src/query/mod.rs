//! History Query Engine: read-only views over a [`RevisionStore`].
//!
//! `show` diffs the keys written at one revision against their previous
//! values; `log` lists revisions newest first with a compact summary of the
//! keys they touched. Styling is left to the [`StyledWriter`] handed in.


use std::collections::BTreeMap;

use chrono::TimeZone;
use serde::de::IgnoredAny;
use tracing::debug;
use tracing::instrument;

use crate::distinct_revisions_descending;
use crate::time::format_watch_time;
use crate::render::Style;
use crate::render::StyledWriter;
use crate::RecordValue;
use crate::Result;
use crate::Revision;
use crate::RevisionStore;
use crate::RevisionsDescending;

/// A key written at the revision passed to [`HistoryQuery::show`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    pub key: Vec<u8>,
    /// Latest earlier record of the key; `None` when the key was created
    pub old: Option<RecordValue>,
    pub new: RecordValue,
}

/// One line of the log view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub revision: Revision,
    /// Nanoseconds since the UNIX epoch
    pub watch_time: i64,
    /// Keys changed at the revision, ascending
    pub keys: Vec<Vec<u8>>,
}

pub struct HistoryQuery<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: RevisionStore + ?Sized> HistoryQuery<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Every key written at `revision` with its previous record, keys
    /// ascending.
    #[instrument(skip(self))]
    pub fn show(
        &self,
        revision: Revision,
    ) -> Result<Vec<KeyChange>> {
        let changes: Vec<KeyChange> = self
            .store
            .changes_with_previous(revision)?
            .into_iter()
            .map(|(record, previous)| KeyChange {
                key: record.key,
                old: previous.map(|prev| prev.value),
                new: record.value,
            })
            .collect();
        debug!("{} keys changed at revision {}", changes.len(), revision);
        Ok(changes)
    }

    /// Revisions touching a key under `prefix`, newest first.
    ///
    /// Revisions without an observation time are skipped.
    pub fn log(
        &self,
        prefix: &[u8],
    ) -> LogEntries<'a, S> {
        LogEntries {
            store: self.store,
            revisions: distinct_revisions_descending(self.store),
            prefix: prefix.to_vec(),
        }
    }
}

/// Lazy iterator returned by [`HistoryQuery::log`].
pub struct LogEntries<'a, S: ?Sized> {
    store: &'a S,
    revisions: RevisionsDescending<'a, S>,
    prefix: Vec<u8>,
}

impl<S: RevisionStore + ?Sized> LogEntries<'_, S> {
    fn entry(
        &self,
        revision: Revision,
    ) -> Result<Option<LogEntry>> {
        let Some(watch_time) = self.store.revision_time(revision)? else {
            return Ok(None);
        };
        let keys: Vec<Vec<u8>> = self
            .store
            .changes_at(revision)?
            .into_iter()
            .map(|r| r.key)
            .filter(|k| k.starts_with(&self.prefix))
            .collect();
        if keys.is_empty() {
            return Ok(None);
        }
        Ok(Some(LogEntry {
            revision,
            watch_time,
            keys,
        }))
    }
}

impl<S: RevisionStore + ?Sized> Iterator for LogEntries<'_, S> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let revision = match self.revisions.next()? {
                Ok(revision) => revision,
                Err(e) => return Some(Err(e)),
            };
            match self.entry(revision) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Re-indents JSON with tabs and a trailing newline; anything else is
/// returned verbatim.
///
/// Only whitespace between tokens changes. Number literals, string escapes
/// and duplicate object keys are copied as they were stored, so two values
/// that differ in any token still differ after re-indenting.
pub fn pretty_value(value: &[u8]) -> Vec<u8> {
    if serde_json::from_slice::<IgnoredAny>(value).is_err() {
        return value.to_vec();
    }
    let mut out = Vec::with_capacity(value.len() + value.len() / 4 + 1);
    reindent(value, &mut out);
    out.push(b'\n');
    out
}

/// Token-level re-indentation of a validated JSON document.
fn reindent(
    src: &[u8],
    out: &mut Vec<u8>,
) {
    fn newline(
        out: &mut Vec<u8>,
        depth: usize,
    ) {
        out.push(b'\n');
        out.extend(std::iter::repeat(b'\t').take(depth));
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    // Set after `{` or `[`; an immediately following close keeps `{}` and
    // `[]` on one line.
    let mut opened = false;

    for &c in src {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                in_string = false;
            }
            continue;
        }
        if matches!(c, b' ' | b'\t' | b'\n' | b'\r') {
            continue;
        }
        if opened {
            opened = false;
            if matches!(c, b'}' | b']') {
                out.push(c);
                continue;
            }
            depth += 1;
            newline(out, depth);
        }
        match c {
            b'"' => {
                in_string = true;
                out.push(c);
            }
            b'{' | b'[' => {
                out.push(c);
                opened = true;
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                newline(out, depth);
                out.push(c);
            }
            b',' => {
                out.push(c);
                newline(out, depth);
            }
            b':' => {
                out.extend_from_slice(b": ");
            }
            _ => out.push(c),
        }
    }
}

/// Keys sharing a `/seg1/seg2/` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup {
    pub prefix: String,
    pub suffixes: Vec<String>,
}

impl std::fmt::Display for KeyGroup {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self.suffixes.as_slice() {
            [] => f.write_str(&self.prefix),
            [suffix] => write!(f, "{}{}", self.prefix, suffix),
            suffixes => write!(f, "{}{{{}}}", self.prefix, suffixes.join(", ")),
        }
    }
}

/// Groups keys of at least four `/`-separated parts by their first three
/// parts. Shorter keys stand alone. Groups come out sorted.
pub fn group_keys<K: AsRef<[u8]>>(keys: &[K]) -> Vec<KeyGroup> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in keys {
        let key = String::from_utf8_lossy(key.as_ref());
        let parts: Vec<&str> = key.splitn(4, '/').collect();
        if parts.len() < 4 {
            groups.entry(key.to_string()).or_default();
            continue;
        }
        let prefix = format!("{}/{}/{}/", parts[0], parts[1], parts[2]);
        groups.entry(prefix).or_default().push(parts[3].to_string());
    }
    groups
        .into_iter()
        .map(|(prefix, suffixes)| KeyGroup { prefix, suffixes })
        .collect()
}

/// Compact summary of keys, e.g. `/cdb/node/{1, 2}, /cdb/other/3`.
pub fn format_key_summary<K: AsRef<[u8]>>(keys: &[K]) -> String {
    group_keys(keys)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Writes one line per entry: revision, observation time in `tz` and key
/// summary, separated by tabs.
///
/// Returns the number of lines written.
pub fn render_log<I, Tz>(
    entries: I,
    out: &mut dyn StyledWriter,
    tz: &Tz,
) -> Result<usize>
where
    I: IntoIterator<Item = Result<LogEntry>>,
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut lines = 0;
    for entry in entries {
        let entry = entry?;
        out.emit(Style::Revision, &format!("{:>12}\t", entry.revision))?;
        out.emit(
            Style::Timestamp,
            &format!("{}\t", format_watch_time(entry.watch_time, tz)),
        )?;
        out.emit(Style::Plain, &format_key_summary(&entry.keys))?;
        out.emit(Style::Plain, "\n")?;
        lines += 1;
    }
    Ok(lines)
}
