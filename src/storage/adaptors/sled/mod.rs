mod sled_revision_store;


pub use sled_revision_store::*;

use crate::Error;

/// Opens the sled database holding the history trees.
#[doc(hidden)]
pub fn init_sled_history_db(
    sled_db_path: impl AsRef<std::path::Path> + std::fmt::Debug,
    cache_capacity: u64,
) -> Result<sled::Db, Error> {
    tracing::debug!("init_sled_history_db from path: {:?}", sled_db_path);

    let path = sled_db_path.as_ref();

    sled::Config::default()
        .path(path)
        .cache_capacity(cache_capacity)
        .flush_every_ms(Some(100))
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            tracing::warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                path,
                e
            );
            e.into()
        })
}
