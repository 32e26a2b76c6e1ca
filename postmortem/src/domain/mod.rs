//! Domain model for postmortem
//!
//! This module contains core domain types and errors:
//! - Newtypes for pids and microsecond timestamps
//! - Structured error handling for the two input sources

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Pid, Timestamp};

pub use errors::{DumpError, ParseError, TraceError};
