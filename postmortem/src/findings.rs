//! Structured findings produced by the thread-dump analyzers.
//!
//! Rendering is left to the caller; every thread mentioned carries an
//! `anchor` string the renderer can use to link to its full stack.

use crate::threads::GroupId;
use postmortem_common::{ThreadDump, ThreadHandle, ThreadRef};
use serde::Serialize;

/// Priority of a deadlock finding.
pub const PRIO_DEADLOCK: u32 = 95;

/// Priority of a main-thread violation finding.
pub const PRIO_MAIN_VIOLATION: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    Deadlock,
    MainThreadViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessLabel {
    pub pid: u32,
    pub name: String,
}

/// The thread a listed thread is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitEdge {
    pub thread: ThreadRef,
    pub name: String,
    /// Type of the contended lock, for lock waits
    pub lock_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadEntry {
    pub thread: ThreadRef,
    pub name: String,
    pub anchor: String,
    pub waiting_for: Option<WaitEdge>,
}

impl ThreadEntry {
    #[must_use]
    pub fn new(thread: &ThreadHandle) -> Self {
        Self {
            thread: thread.thread_ref(),
            name: thread.name.clone(),
            anchor: anchor(thread.thread_ref()),
            waiting_for: None,
        }
    }

    /// Entry that also names what `thread` waits for in `dump`.
    #[must_use]
    pub fn with_dependency(dump: &ThreadDump, thread: &ThreadHandle, target: Option<ThreadRef>) -> Self {
        let waiting_for = target.and_then(|t| {
            let other = dump.find_thread(t)?;
            let lock_type = thread
                .wait_on
                .as_ref()
                .filter(|w| t.pid == thread.pid && w.tid == t.tid)
                .and_then(|w| w.lock_type.clone());
            Some(WaitEdge {
                thread: t,
                name: other.name.clone(),
                lock_type,
            })
        });
        Self {
            waiting_for,
            ..Self::new(thread)
        }
    }
}

/// Stable link target for a thread's stack.
#[must_use]
pub fn anchor(thread: ThreadRef) -> String {
    format!("tid_{}_{}", thread.pid, thread.tid)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FindingDetail {
    Deadlock {
        group: GroupId,
        /// Capture group the threads come from
        dump: String,
        members: Vec<ThreadEntry>,
        blocked: Vec<ThreadEntry>,
    },
    MainThreadViolation {
        thread: ThreadEntry,
        method: String,
        /// `method(file:line)` of the frame that made the call
        caller: Option<String>,
        frame: usize,
        /// Set for indirect violations: the main thread waiting on `thread`
        waiting_thread: Option<ThreadEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub priority: u32,
    pub timestamp_us: u64,
    pub title: String,
    pub supporting_threads: Vec<ThreadRef>,
    pub processes: Vec<ProcessLabel>,
    pub detail: FindingDetail,
}

/// Order findings by priority, highest first, keeping discovery order
/// between equal priorities.
pub fn sort_by_priority(findings: &mut [Finding]) {
    findings.sort_by(|a, b| b.priority.cmp(&a.priority));
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::{ProcessSnapshot, WaitInfo};

    fn finding(kind: FindingKind, priority: u32, title: &str) -> Finding {
        Finding {
            kind,
            priority,
            timestamp_us: 0,
            title: title.to_string(),
            supporting_threads: Vec::new(),
            processes: Vec::new(),
            detail: FindingDetail::Deadlock {
                group: GroupId(0),
                dump: String::new(),
                members: Vec::new(),
                blocked: Vec::new(),
            },
        }
    }

    #[test]
    fn test_sort_is_stable_by_priority() {
        let mut list = vec![
            finding(FindingKind::MainThreadViolation, PRIO_MAIN_VIOLATION, "a"),
            finding(FindingKind::Deadlock, PRIO_DEADLOCK, "b"),
            finding(FindingKind::MainThreadViolation, PRIO_MAIN_VIOLATION, "c"),
        ];
        sort_by_priority(&mut list);
        let titles: Vec<_> = list.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_entry_names_lock_wait() {
        let mut p = ProcessSnapshot::new(10, "app");
        let mut a = ThreadHandle::new(10, 1, "a");
        a.wait_on = Some(WaitInfo {
            tid: 2,
            lock_id: Some("0x42".to_string()),
            lock_type: Some("com.example.Cache".to_string()),
        });
        p.push(a);
        p.push(ThreadHandle::new(10, 2, "b"));
        let mut d = ThreadDump::new("now");
        d.processes.push(p);

        let a = d.find_thread(ThreadRef::new(10, 1)).unwrap();
        let entry = ThreadEntry::with_dependency(&d, a, Some(ThreadRef::new(10, 2)));
        assert_eq!(entry.anchor, "tid_10_1");
        let edge = entry.waiting_for.unwrap();
        assert_eq!(edge.name, "b");
        assert_eq!(edge.lock_type.as_deref(), Some("com.example.Cache"));
    }
}
