use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::Event;
use crate::EventKind;
use crate::Revision;

/// Value of a key at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordValue {
    Put(Vec<u8>),
    /// The key was deleted at this revision
    Tombstone,
}

impl RecordValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RecordValue::Put(v) => Some(v),
            RecordValue::Tombstone => None,
        }
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, RecordValue::Tombstone)
    }
}

/// Persisted form of a mutation, keyed by `(key, mod_revision)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub key: Vec<u8>,
    pub value: RecordValue,
    pub mod_revision: Revision,
}

/// When the historian first observed a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionTimestamp {
    pub mod_revision: Revision,
    /// Nanoseconds since the UNIX epoch
    pub watch_time: i64,
}

/// All writes derived from one watch message, applied in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    records: Vec<HistoryRecord>,
    revision_times: BTreeMap<Revision, i64>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `key` at `revision` and stamps the revision.
    pub fn insert(
        &mut self,
        key: Vec<u8>,
        value: RecordValue,
        revision: Revision,
        watch_time: i64,
    ) {
        self.records.push(HistoryRecord {
            key,
            value,
            mod_revision: revision,
        });
        self.revision_times.entry(revision).or_insert(watch_time);
    }

    /// Derives the writes of one watch message.
    ///
    /// A PUT records its value and a DELETE records a tombstone, both at the
    /// event's own revision. A previous value with a nonzero revision is
    /// recorded at its historical revision, which recovers history that was
    /// never observed directly.
    pub fn from_events(
        events: &[Event],
        watch_time: i64,
    ) -> Self {
        let mut batch = Self::new();
        for event in events {
            let value = match event.kind {
                EventKind::Put => RecordValue::Put(event.kv.value.clone()),
                EventKind::Delete => RecordValue::Tombstone,
            };
            batch.insert(event.kv.key.clone(), value, event.revision(), watch_time);

            if let Some(prev) = event.prev_kv.as_ref().filter(|p| p.mod_revision != 0) {
                batch.insert(
                    prev.key.clone(),
                    RecordValue::Put(prev.value.clone()),
                    prev.mod_revision,
                    watch_time,
                );
            }
        }
        batch
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn revision_times(&self) -> impl Iterator<Item = RevisionTimestamp> + '_ {
        self.revision_times.iter().map(|(rev, time)| RevisionTimestamp {
            mod_revision: *rev,
            watch_time: *time,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Keeps only the writes whose revision satisfies `keep`.
    pub fn retain_revisions<F>(
        &mut self,
        keep: F,
    ) where
        F: Fn(Revision) -> bool,
    {
        self.records.retain(|r| keep(r.mod_revision));
        self.revision_times.retain(|rev, _| keep(*rev));
    }
}

/// Rows actually inserted by one `apply_batch` call. Both are zero when the
/// batch had already been applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub records_inserted: usize,
    pub times_inserted: usize,
}
