use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::Event;
use crate::NetworkError;
use crate::Result;
use crate::Revision;
use crate::WatchRequest;
use crate::WatchResponse;
use crate::WatchStream;
use crate::WatchTransport;

/// Messages served by one subscription of a [`ScriptedTransport`].
pub(crate) struct Script {
    items: Vec<Result<WatchResponse>>,
    hold_open: bool,
    start: Option<Revision>,
}

impl Script {
    /// A subscription that delivers `items` and then ends.
    pub(crate) fn closing(items: Vec<Result<WatchResponse>>) -> Self {
        Script {
            items,
            hold_open: false,
            start: None,
        }
    }

    /// A subscription that delivers `items` and then stays silent.
    pub(crate) fn open(items: Vec<Result<WatchResponse>>) -> Self {
        Script {
            items,
            hold_open: true,
            start: None,
        }
    }

    /// Only serves a subscription starting at `revision`.
    pub(crate) fn at(
        mut self,
        revision: Revision,
    ) -> Self {
        self.start = Some(revision);
        self
    }

    fn serves(
        &self,
        request: &WatchRequest,
    ) -> bool {
        self.start.map_or(true, |rev| rev == request.start_revision)
    }
}

/// One message per event.
pub(crate) fn messages(events: Vec<Event>) -> Vec<Result<WatchResponse>> {
    events
        .into_iter()
        .map(|e| Ok(WatchResponse::with_events(vec![e])))
        .collect()
}

pub(crate) fn stream_of(script: Script) -> WatchStream {
    let items = futures::stream::iter(script.items);
    if script.hold_open {
        items.chain(futures::stream::pending()).boxed()
    } else {
        items.boxed()
    }
}

/// Watch transport replaying prepared subscriptions in order.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<WatchRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        ScriptedTransport {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<WatchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl WatchTransport for ScriptedTransport {
    async fn open(
        &self,
        request: WatchRequest,
    ) -> Result<WatchStream> {
        let script = {
            let mut scripts = self.scripts.lock();
            scripts
                .iter()
                .position(|s| s.serves(&request))
                .and_then(|i| scripts.remove(i))
        };
        self.requests.lock().push(request);
        match script {
            Some(script) => Ok(stream_of(script)),
            None => Err(NetworkError::Remote {
                code: 14,
                message: "no scripted subscription left".to_string(),
            }
            .into()),
        }
    }
}
