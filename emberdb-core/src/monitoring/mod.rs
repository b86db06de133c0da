//! Monitoring for EmberDB
//!
//! Structured logging with tracing and slow-operation tracking

pub mod logging;

pub use logging::*;
