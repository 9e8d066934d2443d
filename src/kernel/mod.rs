//! Thin wrappers around kernel process primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.

pub mod process;
pub mod rlimits;
