//! # postmortem - Offline Concurrency Diagnostics
//!
//! postmortem reads artifacts captured from a device after the fact and
//! explains what its threads were doing: who was fighting for a CPU, who was
//! waiting for whom, and which waits can never end.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────────────┐
//! │  ftrace text         │        │  thread dumps (JSON)             │
//! │  (sched_switch/nop)  │        │  + binder state, ps output       │
//! └──────────┬───────────┘        └───────────────┬──────────────────┘
//!            │ LineSection                        │ ThreadDump
//!            ▼                                    ▼
//! ┌──────────────────────┐        ┌──────────────────────────────────┐
//! │  sched::parser       │        │  threads::graph                  │
//! │  LineFormat strategy │        │  busy frames, AIDL edges         │
//! └──────────┬───────────┘        └───────────────┬──────────────────┘
//!            │ SchedEvent                         │ wait-for edges
//!            ▼                                    ▼
//! ┌──────────────────────┐        ┌────────────────┐ ┌───────────────┐
//! │  sched::reconstruct  │        │  deadlock      │ │  violation    │
//! │  state machine,      │        │  cycle search  │ │  main thread  │
//! │  contending count    │        └───────┬────────┘ └──────┬────────┘
//! └──────────┬───────────┘                │  Finding        │
//!            │ TraceModel                 └────────┬────────┘
//!            ▼                                     ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  analysis::Analysis  →  Report (JSON)                             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`section`]: line-addressable views over captured text
//! - [`metadata`]: process names and parents (`ps` output or JSON)
//! - [`sched`]: scheduler trace parsing and reconstruction
//!   - `parser`: the two supported line layouts
//!   - `reconstruct`: per-process states, durations and the contending count
//!   - `histogram`: time spent at each contending count
//! - [`classification`]: stack-frame rules (busy threads, AIDL proxies,
//!   calls forbidden on the main thread)
//! - [`threads`]: wait-for graph, deadlocks and main-thread violations
//! - [`findings`]: structured, prioritized results
//! - [`analysis`]: runs everything and isolates failing inputs
//! - [`cli`]: command-line arguments
//! - [`domain`]: core types and errors
//!
//! ## Key Concepts
//!
//! - **Contending count**: processes that want a CPU at a point in time,
//!   running or runnable, the idle task excluded
//! - **Initial state inference**: a trace starts mid-flight; the first
//!   transition of each process can reveal what it was doing before, and
//!   earlier records are corrected retroactively
//! - **Wait-for graph**: each thread waits on at most one other, through a
//!   lock in its own process or an AIDL call into another
//! - **Deadlock group**: a cycle in that graph plus every thread whose chain
//!   of waits leads into it

pub mod analysis;
pub mod classification;
pub mod cli;
pub mod domain;
pub mod findings;
pub mod metadata;
pub mod sched;
pub mod section;
pub mod threads;
