//! Safety
//!
//! Managed temp tree, path sanitization and command validation.

pub mod path_guard;
pub mod workspace;

pub use path_guard::{sanitize_filename, CommandKind, PathGuard, SafeName, TempCategory};
pub use workspace::{TempFileGuard, TempTree};
