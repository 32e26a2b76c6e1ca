//! Structured error types for postmortem
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! A `TraceError` or `DumpError` abandons one input source; a `ParseError`
//! only costs the line it was raised for.

use thiserror::Error;

/// The scheduler trace as a whole cannot be analyzed.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Unsupported tracer '{0}'")]
    UnsupportedTracer(String),

    #[error("Trace has {found} usable lines, at least {required} needed")]
    InsufficientData { found: usize, required: usize },

    #[error("Trace contains no scheduler events")]
    EmptyTrace,
}

/// A single trace line could not be turned into an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("Line truncated before {0}")]
    Truncated(&'static str),

    #[error("Invalid pid '{0}'")]
    InvalidPid(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Unrecognized {event} payload: {payload}")]
    UnmatchedPayload { event: String, payload: String },
}

/// A thread dump is missing what the wait-graph analysis needs.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Thread dump '{0}' contains no processes")]
    NoProcesses(String),

    #[error("Thread dump '{dump}' lists process {pid} twice")]
    DuplicatePid { dump: String, pid: u32 },

    #[error("Thread dump '{dump}' lists tid {tid} twice in process {pid}")]
    DuplicateTid { dump: String, pid: u32, tid: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
