//! Entry points of the `watch`, `log` and `show` commands.


use std::sync::Arc;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::open_revision_store;
use crate::render::render_show;
use crate::render::AnsiWriter;
use crate::render::DiffRenderer;
use crate::render::Pager;
use crate::render::PlainWriter;
use crate::render::StyledWriter;
use crate::render_log;
use crate::utils::async_task::spawn_task;
use crate::BackfillPlanner;
use crate::HistorianConfig;
use crate::HistoryQuery;
use crate::HttpWatchTransport;
use crate::KeyRange;
use crate::OpenMode;
use crate::Result;
use crate::Revision;
use crate::RevisionStore;
use crate::StageExt;
use crate::StorageConfig;
use crate::WatchConsumer;
use crate::WatchSummary;
use crate::WatchTransport;

/// Live ingestion: backfill in the background, the watch consumer in the
/// foreground, both writing into one store.
pub struct Historian {
    config: HistorianConfig,
    store: Arc<dyn RevisionStore>,
    transport: Arc<dyn WatchTransport>,
}

impl Historian {
    /// Opens (and migrates) the configured store and connects the HTTP
    /// transport.
    pub fn open(config: HistorianConfig) -> Result<Self> {
        let store = open_revision_store(&config.storage, OpenMode::ReadWrite).stage("open store")?;
        let transport = HttpWatchTransport::new(&config.remote).stage("connect")?;
        info!("watching {} under prefix {:?}", transport.url(), config.remote.prefix);
        Ok(Self::with_parts(config, store, Arc::new(transport)))
    }

    pub fn with_parts(
        config: HistorianConfig,
        store: Arc<dyn RevisionStore>,
        transport: Arc<dyn WatchTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
        }
    }

    pub fn store(&self) -> &Arc<dyn RevisionStore> {
        &self.store
    }

    /// Runs until `cancel` fires or the subscription fails.
    ///
    /// The live subscription starts at `max_revision()` inclusive, so the
    /// last stored revision may be delivered again.
    pub async fn run(
        &self,
        cancel: CancellationToken,
    ) -> Result<WatchSummary> {
        let start: Revision = self.store.max_revision().stage("read max revision")?;
        let range = KeyRange::prefix(self.config.remote.prefix.as_bytes());

        let planner = BackfillPlanner::new(
            self.store.clone(),
            self.transport.clone(),
            range.clone(),
            self.config.backfill.clone(),
        );
        let backfill_cancel = cancel.child_token();
        let backfill = spawn_task("backfill", {
            let cancel = backfill_cancel.clone();
            move || async move { planner.run(cancel).await }
        });

        let consumer = WatchConsumer::new(
            self.transport.clone(),
            self.store.clone(),
            range,
            self.config.remote.prev_kv,
        );
        let result = consumer.run(start, cancel).await.stage("watch");

        backfill_cancel.cancel();
        if let Err(e) = backfill.await {
            warn!("backfill task did not finish cleanly: {}", e);
        }
        self.store.flush().stage("flush")?;
        result
    }
}

/// Writes the log view of the store at `storage` to `pager`.
///
/// Returns the number of revisions listed.
pub fn log_history(
    storage: &StorageConfig,
    prefix: &str,
    pager: &dyn Pager,
) -> Result<usize> {
    let store = open_revision_store(storage, OpenMode::ReadOnly).stage("open store")?;
    let query = HistoryQuery::new(store.as_ref());
    let color = pager.supports_color();

    let mut lines = 0;
    pager
        .page(&mut |out| {
            let entries = query.log(prefix.as_bytes());
            let mut writer: Box<dyn StyledWriter + '_> = if color {
                Box::new(AnsiWriter::new(out))
            } else {
                Box::new(PlainWriter::new(out))
            };
            lines = render_log(entries, writer.as_mut(), &Local)?;
            Ok(())
        })
        .stage("render log")?;
    Ok(lines)
}

/// Diffs every key written at `revision` against its previous value.
///
/// Returns the number of keys changed at the revision.
pub fn show_revision(
    storage: &StorageConfig,
    revision: Revision,
    renderer: &dyn DiffRenderer,
) -> Result<usize> {
    let store = open_revision_store(storage, OpenMode::ReadOnly).stage("open store")?;
    let changes = HistoryQuery::new(store.as_ref())
        .show(revision)
        .stage("query")?;
    if changes.is_empty() {
        info!("no keys changed at revision {}", revision);
        return Ok(0);
    }
    render_show(&changes, renderer).stage("render diff")?;
    Ok(changes.len())
}
