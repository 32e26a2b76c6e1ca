//! AIDL edges from the kernel binder state dump.
//!
//! `/sys/kernel/debug/binder/state` lists every in-flight transaction as
//!
//! ```text
//!     outgoing transaction 2461817: ffffffc0 from 1234:1250 to 567:601 code 3 flags 10 pri 0 r1
//! ```
//!
//! where both `pid:tid` pairs use kernel thread ids. Matching the caller's
//! `sys_tid` against the `from` side gives the thread serving its call.

use super::graph::AidlResolver;
use crate::section::Section;
use log::{debug, warn};
use postmortem_common::{ThreadDump, ThreadHandle, ThreadRef};
use regex::Regex;
use std::sync::OnceLock;

fn transaction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"outgoing transaction [0-9]+: [0-9a-f]+ from ([0-9]+):([0-9]+) to ([0-9]+):([0-9]+)")
            .expect("binder transaction pattern is valid")
    })
}

/// One outgoing binder transaction, in kernel ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinderTransaction {
    pub from_pid: u32,
    pub from_tid: u32,
    pub to_pid: u32,
    pub to_tid: u32,
}

/// [`AidlResolver`] backed by the outgoing transactions of a binder state
/// dump.
#[derive(Debug, Clone, Default)]
pub struct BinderStateResolver {
    transactions: Vec<BinderTransaction>,
}

impl BinderStateResolver {
    #[must_use]
    pub fn new(transactions: Vec<BinderTransaction>) -> Self {
        Self { transactions }
    }

    /// Collect every outgoing transaction line of `section`.
    #[must_use]
    pub fn from_section(section: &dyn Section) -> Self {
        let transactions: Vec<_> = (0..section.line_count())
            .filter_map(|i| section.line(i))
            .filter_map(parse_transaction)
            .collect();
        debug!(
            "{}: {} outgoing binder transactions",
            section.name(),
            transactions.len()
        );
        Self::new(transactions)
    }
}

fn parse_transaction(line: &str) -> Option<BinderTransaction> {
    let caps = transaction_pattern().captures(line)?;
    let num = |i: usize| caps[i].parse::<u32>().ok();
    Some(BinderTransaction {
        from_pid: num(1)?,
        from_tid: num(2)?,
        to_pid: num(3)?,
        to_tid: num(4)?,
    })
}

impl AidlResolver for BinderStateResolver {
    fn resolve(&self, dump: &ThreadDump, caller: &ThreadHandle) -> Option<ThreadRef> {
        let caller_tid = caller.sys_tid?;
        let tx = self
            .transactions
            .iter()
            .find(|t| t.from_pid == caller.pid && t.from_tid == caller_tid)?;

        let Some(process) = dump.find_process(tx.to_pid) else {
            warn!("{}: no process with pid {} in dump", dump.name, tx.to_pid);
            return None;
        };
        let Some(server) = process.find_sys_tid(tx.to_tid) else {
            warn!(
                "{}: no thread with sysTid {} in pid {}",
                dump.name, tx.to_tid, tx.to_pid
            );
            return None;
        };
        Some(server.thread_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::LineSection;
    use postmortem_common::ProcessSnapshot;

    const STATE: &str = "\
binder state:
proc 1234
  thread 1250: l 00
    outgoing transaction 2461817: ffffffc012345678 from 1234:1250 to 567:601 code 3 flags 10 pri 0 r1
    outgoing transaction 2461900: ffffffc0aaaa from 1234:1260 to 567:0 code 1 flags 10 pri 0 r1
proc 567
  thread 601: l 01
    incoming transaction 2461817: ffffffc012345678 from 1234:1250 to 567:601 code 3
";

    fn dump() -> ThreadDump {
        let mut client = ProcessSnapshot::new(1234, "com.example.client");
        let mut caller = ThreadHandle::new(1234, 1, "main");
        caller.sys_tid = Some(1250);
        client.push(caller);

        let mut server = ProcessSnapshot::new(567, "system_server");
        let mut binder = ThreadHandle::new(567, 40, "Binder_3");
        binder.sys_tid = Some(601);
        server.push(binder);

        let mut d = ThreadDump::new("now");
        d.processes = vec![client, server];
        d
    }

    #[test]
    fn test_only_outgoing_lines_are_collected() {
        let resolver = BinderStateResolver::from_section(&LineSection::from_text("binder", STATE));
        assert_eq!(resolver.transactions.len(), 2);
        assert_eq!(
            resolver.transactions[0],
            BinderTransaction {
                from_pid: 1234,
                from_tid: 1250,
                to_pid: 567,
                to_tid: 601
            }
        );
    }

    #[test]
    fn test_resolve_by_sys_tid() {
        let resolver = BinderStateResolver::from_section(&LineSection::from_text("binder", STATE));
        let d = dump();
        let caller = d.find_thread(ThreadRef::new(1234, 1)).unwrap();
        assert_eq!(resolver.resolve(&d, caller), Some(ThreadRef::new(567, 40)));
    }

    #[test]
    fn test_unknown_server_thread() {
        let resolver = BinderStateResolver::new(vec![BinderTransaction {
            from_pid: 1234,
            from_tid: 1250,
            to_pid: 567,
            to_tid: 999,
        }]);
        let d = dump();
        let caller = d.find_thread(ThreadRef::new(1234, 1)).unwrap();
        assert_eq!(resolver.resolve(&d, caller), None);
    }

    #[test]
    fn test_thread_without_outgoing_call() {
        let resolver = BinderStateResolver::from_section(&LineSection::from_text("binder", STATE));
        let d = dump();
        let server = d.find_thread(ThreadRef::new(567, 40)).unwrap();
        assert_eq!(resolver.resolve(&d, server), None);
    }
}
