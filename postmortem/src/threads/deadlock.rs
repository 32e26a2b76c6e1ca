//! Deadlock detection over the wait-for graph.
//!
//! Each thread has at most one outgoing edge, so following edges from any
//! thread either dead-ends, reaches a cycle, or reaches a thread already
//! classified by an earlier walk. A cycle is a deadlock; every thread whose
//! chain leads into it is blocked by it. Each thread is classified once and
//! never walked again, keeping the whole pass linear in the number of
//! threads.

use super::graph::{dependency_of, dependency_where};
use crate::findings::{
    Finding, FindingDetail, FindingKind, ProcessLabel, ThreadEntry, PRIO_DEADLOCK,
};
use log::info;
use postmortem_common::{ThreadDump, ThreadHandle, ThreadRef};
use serde::Serialize;
use std::collections::HashMap;

/// Identifier of a deadlock group within one detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub usize);

/// One cycle and the threads stuck behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockGroup {
    pub id: GroupId,
    /// Threads on the cycle, in edge order
    pub members: Vec<ThreadRef>,
    /// Threads whose dependency chain leads into the cycle
    pub blocked: Vec<ThreadRef>,
}

impl DeadlockGroup {
    /// Members followed by blocked threads.
    pub fn threads(&self) -> impl Iterator<Item = ThreadRef> + '_ {
        self.members.iter().chain(self.blocked.iter()).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    /// Chain ends without a cycle
    Free,
    Deadlocked(GroupId),
}

/// State of one detection run over one dump.
pub struct Detector<'d> {
    dump: &'d ThreadDump,
    threads: HashMap<ThreadRef, &'d ThreadHandle>,
    classified: HashMap<ThreadRef, Class>,
    groups: Vec<DeadlockGroup>,
}

impl<'d> Detector<'d> {
    #[must_use]
    pub fn new(dump: &'d ThreadDump) -> Self {
        let threads = dump.threads().map(|t| (t.thread_ref(), t)).collect();
        Self {
            dump,
            threads,
            classified: HashMap::new(),
            groups: Vec::new(),
        }
    }

    #[must_use]
    pub fn run(mut self) -> Vec<DeadlockGroup> {
        for start in self.dump.thread_refs() {
            if !self.classified.contains_key(&start) {
                self.walk(start);
            }
        }
        self.groups
    }

    fn walk(&mut self, start: ThreadRef) {
        let mut path = vec![start];
        let mut on_path = HashMap::from([(start, 0usize)]);
        let mut current = start;

        let outcome = loop {
            let next = self
                .threads
                .get(&current)
                .and_then(|t| dependency_where(t, |r| self.threads.contains_key(&r)));
            let Some(next) = next else {
                break Class::Free;
            };
            if let Some(&class) = self.classified.get(&next) {
                if let Class::Deadlocked(id) = class {
                    self.groups[id.0].blocked.extend_from_slice(&path);
                }
                break class;
            }
            if let Some(&i) = on_path.get(&next) {
                let id = GroupId(self.groups.len());
                self.groups.push(DeadlockGroup {
                    id,
                    members: path[i..].to_vec(),
                    blocked: path[..i].to_vec(),
                });
                break Class::Deadlocked(id);
            }
            on_path.insert(next, path.len());
            path.push(next);
            current = next;
        };

        for thread in path {
            self.classified.insert(thread, outcome);
        }
    }
}

/// Every deadlock in `dump`, in discovery order.
#[must_use]
pub fn detect(dump: &ThreadDump) -> Vec<DeadlockGroup> {
    let groups = Detector::new(dump).run();
    if !groups.is_empty() {
        info!("{}: {} deadlock(s) found", dump.name, groups.len());
    }
    groups
}

/// One finding per deadlock group.
#[must_use]
pub fn deadlock_findings(dump: &ThreadDump, groups: &[DeadlockGroup]) -> Vec<Finding> {
    groups.iter().map(|g| deadlock_finding(dump, g)).collect()
}

fn deadlock_finding(dump: &ThreadDump, group: &DeadlockGroup) -> Finding {
    let mut processes: Vec<ProcessLabel> = Vec::new();
    for thread in group.threads() {
        if processes.iter().any(|p| p.pid == thread.pid) {
            continue;
        }
        let name = dump
            .find_process(thread.pid)
            .map_or_else(|| thread.pid.to_string(), |p| p.name.clone());
        processes.push(ProcessLabel {
            pid: thread.pid,
            name,
        });
    }

    let entries = |refs: &[ThreadRef]| -> Vec<ThreadEntry> {
        refs.iter()
            .filter_map(|r| dump.find_thread(*r))
            .map(|t| ThreadEntry::with_dependency(dump, t, dependency_of(dump, t)))
            .collect()
    };

    let names: Vec<&str> = processes.iter().map(|p| p.name.as_str()).collect();
    Finding {
        kind: FindingKind::Deadlock,
        priority: PRIO_DEADLOCK,
        timestamp_us: 0,
        title: format!("Deadlock in process(es) {}", names.join(", ")),
        supporting_threads: group.threads().collect(),
        processes,
        detail: FindingDetail::Deadlock {
            group: group.id,
            dump: dump.name.clone(),
            members: entries(&group.members),
            blocked: entries(&group.blocked),
        },
    }
}
