//! Utilities
//!
//! Bounded output collection shared by every stage that reads a child pipe.

pub mod output;
