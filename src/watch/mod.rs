//! Watch Consumer: one long-lived subscription to the remote watch stream,
//! applied message by message to the [`RevisionStore`].
//!
//! There is no reconnect at this layer. Any transport, status or decode
//! failure ends [`WatchConsumer::run`] with an error, and a restart resumes
//! from [`RevisionStore::max_revision`]; insert-if-absent writes make the
//! redelivered revisions harmless.
mod http;
mod proto;


use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
pub use proto::decode_watch_line;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

pub use self::http::*;
use crate::time::now_as_nanos;
use crate::BatchOutcome;
use crate::Event;
use crate::NetworkError;
use crate::Result;
use crate::Revision;
use crate::RevisionStore;
use crate::WriteBatch;

/// Smallest key greater than every key starting with `prefix`.
///
/// Trailing `0xFF` bytes are stripped and the last remaining byte is
/// incremented. An empty result means the range is unbounded above.
///
/// # Examples
/// ```
/// use etx::watch::prefix_range_end;
///
/// assert_eq!(prefix_range_end(b"/a/"), b"/a0".to_vec());
/// assert_eq!(prefix_range_end(&[0x61, 0xFF]), vec![0x62]);
/// ```
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while end.last() == Some(&0xFF) {
        end.pop();
    }
    if let Some(last) = end.last_mut() {
        *last += 1;
    }
    end
}

/// Half-open key range `[key, range_end)` of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub key: Vec<u8>,
    pub range_end: Vec<u8>,
}

impl KeyRange {
    /// All keys starting with `prefix`.
    ///
    /// etcd reads `range_end = "\0"` as "every key >= key"; that encoding is
    /// used when no finite successor exists.
    pub fn prefix(prefix: impl AsRef<[u8]>) -> Self {
        let prefix = prefix.as_ref();
        let range_end = prefix_range_end(prefix);
        if range_end.is_empty() {
            let key = if prefix.is_empty() {
                vec![0]
            } else {
                prefix.to_vec()
            };
            return KeyRange {
                key,
                range_end: vec![0],
            };
        }
        KeyRange {
            key: prefix.to_vec(),
            range_end,
        }
    }

    pub fn contains(
        &self,
        key: &[u8],
    ) -> bool {
        key >= self.key.as_slice() && (self.range_end == [0] || key < self.range_end.as_slice())
    }
}

/// Parameters of one watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub range: KeyRange,
    pub start_revision: Revision,
    /// Ask the server to attach the previous value to every event
    pub prev_kv: bool,
}

/// One decoded message of the watch stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchResponse {
    /// Revision of the remote store when the message was sent
    pub header_revision: Revision,
    pub watch_id: i64,
    pub created: bool,
    pub canceled: bool,
    /// Oldest revision still available, set when the start revision was
    /// compacted
    pub compact_revision: Revision,
    pub cancel_reason: String,
    pub events: Vec<Event>,
}

impl WatchResponse {
    pub fn with_events(events: Vec<Event>) -> Self {
        let header_revision = events.last().map(Event::revision).unwrap_or_default();
        WatchResponse {
            header_revision,
            events,
            ..Default::default()
        }
    }

    /// Fails when the server cancelled the subscription.
    pub fn check_canceled(&self) -> Result<()> {
        if self.canceled {
            return Err(NetworkError::WatchCanceled {
                compact_revision: self.compact_revision,
                reason: self.cancel_reason.clone(),
            }
            .into());
        }
        Ok(())
    }
}

pub type WatchStream = BoxStream<'static, Result<WatchResponse>>;

/// Opens watch subscriptions on the remote store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Sends the create request and returns the stream of messages.
    ///
    /// Fails when the subscription cannot be set up, e.g. on a non-200
    /// status.
    async fn open(
        &self,
        request: WatchRequest,
    ) -> Result<WatchStream>;
}

/// Applies every event of `response` to `store` in a single transaction,
/// stamped with `watch_time`.
pub fn apply_response(
    store: &dyn RevisionStore,
    response: &WatchResponse,
    watch_time: i64,
) -> Result<BatchOutcome> {
    let batch = WriteBatch::from_events(&response.events, watch_time);
    store.apply_batch(&batch)
}

/// Progress of one [`WatchConsumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub messages: u64,
    pub events: u64,
    pub records_inserted: usize,
    /// Highest event revision applied, 0 when none
    pub last_revision: Revision,
}

pub struct WatchConsumer {
    transport: Arc<dyn WatchTransport>,
    store: Arc<dyn RevisionStore>,
    range: KeyRange,
    prev_kv: bool,
}

impl WatchConsumer {
    pub fn new(
        transport: Arc<dyn WatchTransport>,
        store: Arc<dyn RevisionStore>,
        range: KeyRange,
        prev_kv: bool,
    ) -> Self {
        Self {
            transport,
            store,
            range,
            prev_kv,
        }
    }

    /// Subscribes at `start_revision` and applies messages in delivery order
    /// until cancelled or until the stream fails.
    ///
    /// Cancellation is only observed between messages, so a message is
    /// either fully applied or not at all.
    #[instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        start_revision: Revision,
        cancel: CancellationToken,
    ) -> Result<WatchSummary> {
        let mut summary = WatchSummary::default();
        let request = WatchRequest {
            range: self.range.clone(),
            start_revision,
            prev_kv: self.prev_kv,
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("watch cancelled before the subscription was established");
                return Ok(summary);
            }
            stream = self.transport.open(request) => stream?,
        };
        info!("watching from revision {}", start_revision);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(?summary, "watch cancelled");
                    return Ok(summary);
                }
                next = stream.next() => next,
            };

            let response = match next {
                Some(response) => response?,
                None => {
                    warn!(?summary, "watch stream ended");
                    return Err(NetworkError::StreamClosed.into());
                }
            };
            response.check_canceled()?;
            if response.created {
                debug!(watch_id = response.watch_id, "watch created");
            }
            if response.events.is_empty() {
                continue;
            }

            let outcome = apply_response(self.store.as_ref(), &response, now_as_nanos())?;
            summary.messages += 1;
            summary.events += response.events.len() as u64;
            summary.records_inserted += outcome.records_inserted;
            summary.last_revision = response
                .events
                .iter()
                .map(Event::revision)
                .max()
                .unwrap_or(summary.last_revision)
                .max(summary.last_revision);
            debug!(
                header_revision = response.header_revision,
                events = response.events.len(),
                ?outcome,
                "watch message applied"
            );
        }
    }
}
