//! Terminal-facing collaborators of the query commands: styled output, the
//! pager and the external diff tool.
mod diff;
mod pager;
mod style;


pub use diff::*;
pub use pager::*;
pub use style::*;
