//! Thread-dump analysis
//!
//! - `graph`: wait-for edges and busy classification
//! - `binder`: AIDL edges from the kernel binder state
//! - `deadlock`: cycle search over the wait-for graph
//! - `violation`: main-thread policy checks

pub mod binder;
pub mod deadlock;
pub mod graph;
pub mod violation;

pub use binder::{BinderStateResolver, BinderTransaction};
pub use deadlock::{deadlock_findings, detect, DeadlockGroup, Detector, GroupId};
pub use graph::{build, dependency_of, AidlResolver, NoAidl, WaitGraph};
pub use violation::check_main_threads;
