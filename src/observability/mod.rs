//! Observability
//!
//! Structured security audit events.

pub mod audit;
