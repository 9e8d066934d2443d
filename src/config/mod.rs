//! Configuration
//!
//! Engine-wide settings, shared result types, and startup validation.

pub mod loader;
pub mod types;
pub mod validator;

pub use loader::EngineConfig;
