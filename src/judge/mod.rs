//! Compile, run, compare and debug stages.
//!
//! Each stage takes a [`RequestContext`](crate::core::session::RequestContext)
//! for correlation and returns a serializable record. `Err` is reserved for
//! requests rejected before any process is spawned.

pub mod compare;
pub mod compile;
pub mod debug;
pub mod execute;
pub mod pipeline;
pub mod toolchain;

pub use compare::{compare, CompareOptions};
pub use compile::Compiler;
pub use debug::Debugger;
pub use execute::Executor;
pub use pipeline::{CaseReport, JudgePipeline, JudgeReport, JudgeRequest, TestCase};
pub use toolchain::{GnuToolchain, ToolchainAdapter};
