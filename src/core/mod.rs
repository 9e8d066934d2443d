//! Request dispatch.
//!
//! [`engine::Engine`] owns the immutable configuration and the stage
//! objects. Every request gets a [`session::RequestContext`] that lives
//! until the response is built.

pub mod engine;
pub mod session;
pub mod types;

pub use engine::{DependencyReport, Engine};
pub use session::{OperationKind, RequestContext};
pub use types::{Operation, Response};
