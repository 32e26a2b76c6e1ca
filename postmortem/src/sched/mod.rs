//! Scheduler trace analysis
//!
//! - `parser`: trace line layouts and their [`LineFormat`] strategies
//! - `reconstruct`: per-process state machine and contending count
//! - `names`: process display names from metadata
//! - `histogram`: time spent at each contending count

pub mod event;
pub mod histogram;
pub mod names;
pub mod parser;
pub mod reconstruct;

pub use event::SchedEvent;
pub use histogram::ParallelHistogram;
pub use names::NameResolver;
pub use parser::{default_formats, EventFormat, LegacyFormat, LineFormat, LineParser};
pub use reconstruct::{
    AnalysisConfig, ProcessTraceStats, Reconstructor, TraceModel, TraceRecord,
};
