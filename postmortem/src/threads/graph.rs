//! Wait-for graph over one thread dump.
//!
//! Every thread has at most one outgoing edge, so the graph is functional
//! and edges are stored on the threads themselves (`wait_on`,
//! `aidl_dependency`). Building the graph fills in what the loader could not
//! know: cross-process AIDL edges and which threads are busy.

use crate::classification::{busy_matches, proxy_call};
use log::{debug, warn};
use postmortem_common::{FrameStyle, ThreadDump, ThreadHandle, ThreadRef};
use serde::Serialize;

/// Finds the remote thread servicing an outgoing AIDL call.
pub trait AidlResolver {
    /// Thread serving the call `caller` is blocked in, if it can be found
    /// in `dump`.
    fn resolve(&self, dump: &ThreadDump, caller: &ThreadHandle) -> Option<ThreadRef>;
}

/// Resolves nothing; AIDL edges then come only from the loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAidl;

impl AidlResolver for NoAidl {
    fn resolve(&self, _dump: &ThreadDump, _caller: &ThreadHandle) -> Option<ThreadRef> {
        None
    }
}

/// What the graph builder learned about a dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaitGraph {
    /// Busy threads, de-duplicated, in capture order
    pub busy: Vec<ThreadRef>,
    /// AIDL edges added by the resolver
    pub resolved_aidl: usize,
    /// Proxy calls whose server thread could not be found
    pub unresolved_aidl: usize,
}

/// Annotate `dump` in place: style busy frames, drop self-waits and add
/// AIDL edges.
pub fn build(dump: &mut ThreadDump, resolver: &dyn AidlResolver) -> WaitGraph {
    let mut graph = WaitGraph::default();
    let dump_name = dump.name.clone();

    for thread_ref in dump.thread_refs() {
        let Some(thread) = dump.find_thread(thread_ref) else {
            continue;
        };
        let busy = busy_matches(thread);
        let aidl = if thread.aidl_dependency.is_none() {
            proxy_call(thread).map(|call| (call, resolver.resolve(dump, thread)))
        } else {
            None
        };

        let Some(thread) = dump.find_thread_mut(thread_ref) else {
            continue;
        };

        if !busy.is_empty() {
            for m in &busy {
                thread.set_style(m.frames.clone(), FrameStyle::Busy);
            }
            graph.busy.push(thread_ref);
        }

        if thread.wait_on.as_ref().is_some_and(|w| w.tid == thread.tid) {
            debug!("{thread_ref}: ignoring wait on itself");
            thread.wait_on = None;
        }

        match aidl {
            Some((_, Some(server))) => {
                thread.aidl_dependency = Some(server);
                graph.resolved_aidl += 1;
            }
            Some((call, None)) => {
                warn!(
                    "{}: cannot find server of {}.{} called by pid {} tid {}",
                    dump_name, call.interface, call.method, thread_ref.pid, thread_ref.tid
                );
                graph.unresolved_aidl += 1;
            }
            None => {}
        }
    }

    graph
}

/// The thread `thread` is waiting for: its lock owner in the same process
/// when that thread exists, else the server of its AIDL call.
#[must_use]
pub fn dependency_of(dump: &ThreadDump, thread: &ThreadHandle) -> Option<ThreadRef> {
    dependency_where(thread, |r| dump.find_thread(r).is_some())
}

/// [`dependency_of`] with thread existence answered by `exists`.
pub(crate) fn dependency_where(
    thread: &ThreadHandle,
    exists: impl Fn(ThreadRef) -> bool,
) -> Option<ThreadRef> {
    let me = thread.thread_ref();
    let lock_owner = thread
        .wait_on
        .as_ref()
        .map(|w| ThreadRef::new(thread.pid, w.tid))
        .filter(|r| *r != me && exists(*r));

    lock_owner.or_else(|| thread.aidl_dependency.filter(|r| *r != me && exists(*r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::{CallFrame, ProcessSnapshot, WaitInfo};

    struct FixedServer(ThreadRef);

    impl AidlResolver for FixedServer {
        fn resolve(&self, _dump: &ThreadDump, _caller: &ThreadHandle) -> Option<ThreadRef> {
            Some(self.0)
        }
    }

    fn proxy_thread(pid: u32, tid: u32) -> ThreadHandle {
        let mut t = ThreadHandle::new(pid, tid, "caller");
        t.frames = vec![
            CallFrame::java("android.os.BinderProxy.transact", "Binder.java", 1),
            CallFrame::java("com.example.IStore$Stub$Proxy.load", "IStore.java", 2),
        ];
        t
    }

    fn dump() -> ThreadDump {
        let mut app = ProcessSnapshot::new(100, "com.example.app");
        app.push(proxy_thread(100, 1));
        let mut waiter = ThreadHandle::new(100, 2, "waiter");
        waiter.wait_on = Some(WaitInfo {
            tid: 1,
            lock_id: Some("0x1".to_string()),
            lock_type: Some("java.lang.Object".to_string()),
        });
        app.push(waiter);

        let mut server = ProcessSnapshot::new(200, "com.example.store");
        let mut binder = ThreadHandle::new(200, 9, "Binder_1");
        binder.frames = vec![
            CallFrame::java("com.example.Store.load", "Store.java", 5),
            CallFrame::java("android.os.Binder.execTransact", "Binder.java", 7),
        ];
        server.push(binder);

        let mut d = ThreadDump::new("now");
        d.processes = vec![app, server];
        d
    }

    #[test]
    fn test_busy_and_aidl_edges() {
        let mut d = dump();
        let graph = build(&mut d, &FixedServer(ThreadRef::new(200, 9)));

        assert_eq!(graph.busy, vec![ThreadRef::new(200, 9)]);
        assert_eq!(graph.resolved_aidl, 1);
        assert_eq!(graph.unresolved_aidl, 0);

        let server = d.find_thread(ThreadRef::new(200, 9)).unwrap();
        assert_eq!(server.frames[0].style, FrameStyle::Busy);
        assert_eq!(server.frames[1].style, FrameStyle::Normal);

        let caller = d.find_thread(ThreadRef::new(100, 1)).unwrap();
        assert_eq!(dependency_of(&d, caller), Some(ThreadRef::new(200, 9)));
    }

    #[test]
    fn test_unresolved_aidl_is_counted() {
        let mut d = dump();
        let graph = build(&mut d, &NoAidl);
        assert_eq!(graph.unresolved_aidl, 1);
        let caller = d.find_thread(ThreadRef::new(100, 1)).unwrap();
        assert_eq!(dependency_of(&d, caller), None);
    }

    #[test]
    fn test_wait_on_takes_precedence() {
        let mut d = dump();
        if let Some(t) = d.find_thread_mut(ThreadRef::new(100, 2)) {
            t.aidl_dependency = Some(ThreadRef::new(200, 9));
        }
        let waiter = d.find_thread(ThreadRef::new(100, 2)).unwrap();
        assert_eq!(dependency_of(&d, waiter), Some(ThreadRef::new(100, 1)));
    }

    #[test]
    fn test_wait_on_missing_thread_falls_back_to_aidl() {
        let mut d = dump();
        if let Some(t) = d.find_thread_mut(ThreadRef::new(100, 2)) {
            t.wait_on = Some(WaitInfo {
                tid: 77,
                lock_id: None,
                lock_type: None,
            });
            t.aidl_dependency = Some(ThreadRef::new(200, 9));
        }
        let waiter = d.find_thread(ThreadRef::new(100, 2)).unwrap();
        assert_eq!(dependency_of(&d, waiter), Some(ThreadRef::new(200, 9)));
    }

    #[test]
    fn test_self_wait_is_dropped() {
        let mut d = dump();
        if let Some(t) = d.find_thread_mut(ThreadRef::new(100, 2)) {
            t.wait_on = Some(WaitInfo {
                tid: 2,
                lock_id: None,
                lock_type: None,
            });
        }
        build(&mut d, &NoAidl);
        assert!(d.find_thread(ThreadRef::new(100, 2)).unwrap().wait_on.is_none());
    }
}
