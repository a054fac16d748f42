mod migration;
mod sqlite_revision_store;

#[cfg(test)]
mod sqlite_revision_store_test;

pub use sqlite_revision_store::*;
