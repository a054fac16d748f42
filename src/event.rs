//! Change events as delivered by the remote store's watch stream.

use std::fmt;

/// Revision assigned by the remote store to every mutation.
pub type Revision = i64;

/// Kind of mutation carried by an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Put,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            EventKind::Put => f.write_str("PUT"),
            EventKind::Delete => f.write_str("DELETE"),
        }
    }
}

/// A key/value pair at a given revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub mod_revision: Revision,
}

/// One observed mutation. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub kv: KeyValue,
    /// Value of the key before this mutation, when the server sends it.
    /// A `mod_revision` of zero means "no previous value".
    pub prev_kv: Option<KeyValue>,
}

impl Event {
    pub fn put(
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        mod_revision: Revision,
    ) -> Self {
        Event {
            kind: EventKind::Put,
            kv: KeyValue {
                key: key.into(),
                value: value.into(),
                mod_revision,
            },
            prev_kv: None,
        }
    }

    pub fn delete(
        key: impl Into<Vec<u8>>,
        mod_revision: Revision,
    ) -> Self {
        Event {
            kind: EventKind::Delete,
            kv: KeyValue {
                key: key.into(),
                value: Vec::new(),
                mod_revision,
            },
            prev_kv: None,
        }
    }

    pub fn with_prev_kv(
        mut self,
        value: impl Into<Vec<u8>>,
        mod_revision: Revision,
    ) -> Self {
        self.prev_kv = Some(KeyValue {
            key: self.kv.key.clone(),
            value: value.into(),
            mod_revision,
        });
        self
    }

    #[inline]
    pub fn revision(&self) -> Revision {
        self.kv.mod_revision
    }
}
