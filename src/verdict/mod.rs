//! Outcome classification
//!
//! Derives outcomes as pure functions over immutable evidence.

pub mod classifier;

pub use classifier::{Termination, Verdict, VerdictClassifier};
