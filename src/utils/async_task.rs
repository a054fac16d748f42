use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

use crate::Result;

/// Spawns a named background task whose failure is logged, not propagated.
///
/// The handle is returned so the caller can wait for the task on shutdown.
pub(crate) fn spawn_task<F, Fut, T>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    T: std::fmt::Debug + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    tokio::spawn(async move {
        match task_fn().await {
            Ok(r) => info!("spawned task: {name} finished: {:?}", r),
            Err(e) => error!("spawned task: {name} stopped or encountered an error: {}", e),
        }
    })
}
