//! One decoded scheduler trace line.

use crate::domain::{Pid, Timestamp};
use postmortem_common::EventKind;

/// Name the kernel prints when it did not know a task's comm.
pub const UNKNOWN_COMM: &str = "<...>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedEvent {
    pub source_pid: Pid,
    /// Raw kernel state letter of the source task
    pub source_state: char,
    pub source_name: Option<String>,
    pub dest_pid: Pid,
    /// Raw kernel state letter of the destination task
    pub dest_state: char,
    pub dest_name: Option<String>,
    pub timestamp: Timestamp,
    pub kind: EventKind,
}

/// Task name as printed in a trace, `None` for blanks and [`UNKNOWN_COMM`].
#[must_use]
pub fn task_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name == UNKNOWN_COMM {
        None
    } else {
        Some(name.to_string())
    }
}
