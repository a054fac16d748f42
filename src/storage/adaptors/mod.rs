mod sled;
mod sqlite;

pub use self::sled::*;
pub use self::sqlite::*;
