//! Main-thread policy violations.
//!
//! The main thread of an app must not block on disk, database or network
//! I/O. A violation is direct when the main thread's own stack is inside a
//! forbidden call, and indirect when the main thread waits on a lock held
//! by a thread that is.

use crate::classification::{is_forbidden_on_main_thread, MAIN_THREAD_NAME};
use crate::findings::{
    Finding, FindingDetail, FindingKind, ProcessLabel, ThreadEntry, PRIO_MAIN_VIOLATION,
};
use log::debug;
use postmortem_common::{FrameStyle, ThreadDump, ThreadHandle, ThreadRef};

/// A forbidden call found in a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Offense {
    frame: usize,
    method: String,
    caller: Option<String>,
}

/// First forbidden call from the top of the stack. The caller is the next
/// frame towards the thread's entry point, if there is one.
fn find_offense(thread: &ThreadHandle) -> Option<Offense> {
    let (frame, method) = thread
        .frames
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.method.as_deref().map(|m| (i, m)))
        .find(|(_, m)| is_forbidden_on_main_thread(m))?;
    Some(Offense {
        frame,
        method: method.to_string(),
        caller: thread.frames.get(frame + 1).map(|f| f.location()),
    })
}

/// Scan every main thread in `dump`, style offending frames and report one
/// finding per offending stack.
pub fn check_main_threads(dump: &mut ThreadDump) -> Vec<Finding> {
    let mains: Vec<ThreadRef> = dump
        .threads()
        .filter(|t| t.name == MAIN_THREAD_NAME)
        .map(ThreadHandle::thread_ref)
        .collect();

    let mut findings = Vec::new();
    for main in mains {
        if let Some(f) = check_thread(dump, main, None) {
            findings.push(f);
        }

        // Only lock waits count; the server of an AIDL call runs under its
        // own process's policy.
        let lock_owner = dump
            .find_thread(main)
            .and_then(|t| t.wait_on.as_ref())
            .map(|w| ThreadRef::new(main.pid, w.tid))
            .filter(|other| *other != main && dump.find_thread(*other).is_some());
        if let Some(other) = lock_owner {
            if let Some(f) = check_thread(dump, other, Some(main)) {
                findings.push(f);
            }
        }
    }
    findings
}

fn check_thread(
    dump: &mut ThreadDump,
    offender: ThreadRef,
    waiting_main: Option<ThreadRef>,
) -> Option<Finding> {
    let thread = dump.find_thread(offender)?;
    let offense = find_offense(thread)?;
    debug!(
        "{}: {} calls {} at frame {}",
        dump.name, offender, offense.method, offense.frame
    );

    let entry = ThreadEntry::new(thread);
    let waiting_thread = waiting_main
        .and_then(|m| dump.find_thread(m))
        .map(|m| ThreadEntry::with_dependency(dump, m, Some(offender)));
    let process_name = dump
        .find_process(offender.pid)
        .map_or_else(|| offender.pid.to_string(), |p| p.name.clone());

    let mut title = format!("Main thread violation: {}", offense.method);
    if waiting_main.is_some() {
        title = format!("(Indirect) {title}");
    }

    let mut supporting = vec![offender];
    supporting.extend(waiting_main);

    if let Some(thread) = dump.find_thread_mut(offender) {
        thread.set_style(offense.frame..offense.frame + 2, FrameStyle::Error);
    }

    Some(Finding {
        kind: FindingKind::MainThreadViolation,
        priority: PRIO_MAIN_VIOLATION,
        timestamp_us: 0,
        title,
        supporting_threads: supporting,
        processes: vec![ProcessLabel {
            pid: offender.pid,
            name: process_name,
        }],
        detail: FindingDetail::MainThreadViolation {
            thread: entry,
            method: offense.method,
            caller: offense.caller,
            frame: offense.frame,
            waiting_thread,
        },
    })
}
