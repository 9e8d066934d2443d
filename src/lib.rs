//! oibox: sandboxed compile, run, compare and debug for short C++ programs
//! Built for judging untrusted contest submissions on a single host
//!
//! # Architecture
//!
//! ## Request Dispatch ([`core`])
//! - [`core::engine`]: Process-wide engine and the `handle(Operation)` entry point
//! - [`core::session`]: Per-request correlation context
//! - [`core::types`]: Closed operation and response sets
//!
//! ## Stages ([`judge`])
//! - [`judge::compile`]: Source to binary under a compile-time budget
//! - [`judge::execute`]: Bounded execution with outcome classification
//! - [`judge::compare`]: Normalized line-by-line output comparison
//! - [`judge::debug`]: Scripted batch-mode debugger sessions
//! - [`judge::pipeline`]: Compile once, run many cases
//! - [`judge::toolchain`]: Compiler and debugger invocation seam
//!
//! ## Process Control ([`kernel`])
//! - [`kernel::rlimits`]: Override resolution and rlimit installation
//! - [`kernel::process`]: Process groups, `wait4` evidence, kill and reap
//!
//! ## Evidence & Verdict ([`verdict`])
//! - [`verdict::classifier`]: Termination evidence to outcome tag
//!
//! ## Safety ([`safety`])
//! - [`safety::path_guard`]: Name sanitization and managed-root confinement
//! - [`safety::workspace`]: Temp tree layout and retention
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured security audit trail
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: JSON configuration with defaults
//! - [`config::validator`]: Startup validation
//! - [`config::types`]: Result records, error taxonomy and shared enums
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Bounded stream collection and truncation
//!
//! # Design Principles
//!
//! 1. **Kernel as truth** - Exit status, signals, CPU and peak memory come from `wait4`
//! 2. **No stray processes** - Every child runs in its own group and is reaped before return
//! 3. **Confined filesystem** - Every path the engine writes or executes lives under the managed root
//! 4. **Structured failures** - Stage errors are records, not panics

// Request dispatch
pub mod core;

// Compile/run/compare/debug stages
pub mod judge;

// Process control
pub mod kernel;

// Evidence & Verdict
pub mod verdict;

// Safety
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the oibox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use core::engine::Engine;
pub use core::types::{Operation, Response};
