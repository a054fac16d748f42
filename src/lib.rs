//! etx: an etcd historian.
//!
//! Subscribes to an etcd watch stream, records every key mutation indexed by
//! revision, repairs gaps in revision coverage, and answers history queries.

mod constants;
mod errors;
mod event;

pub mod backfill;
pub mod config;
pub mod historian;
pub mod query;
pub mod render;
pub mod storage;
pub mod utils;
pub mod watch;

pub use backfill::*;
pub use crate::config::*;
pub use errors::*;
pub use event::*;
pub use historian::*;
pub use query::*;
pub use storage::*;
pub use utils::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
