//! Utilities Module
//!
//! Common utilities used across the crate.

pub mod crypto;
pub mod debounce;
pub mod logging;

pub use crypto::*;
pub use debounce::*;
pub use logging::{init_tracing, LogEntry, LogLevel};
