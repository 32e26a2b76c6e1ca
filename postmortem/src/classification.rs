//! Stack classification for Android thread dumps.
//!
//! Method-name tables and heuristics that decide, from a captured stack
//! alone, whether a thread was doing work, whether it was blocked in a
//! cross-process call, and whether it was calling something that must not
//! run on the main thread.
//!
//! # Busy Heuristics
//!
//! A thread parked in its idle loop says nothing interesting. A thread is
//! considered busy when its stack shows it away from that idle point:
//!
//! 1. **Looper threads** - `Looper.loop` without the message-queue poll above it
//! 2. **Binder threads** - dispatching an incoming transaction (Java or native)
//! 3. **VM-started threads** - a Java frame above `NativeStart.run`
//!
//! In every case the frames from the top of the stack down to (excluding)
//! the anchor frame are the work being done.

use postmortem_common::{FrameKind, ThreadHandle};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

// ============================================================================
// Method Tables
// ============================================================================

const LOOPER_LOOP: &str = "android.os.Looper.loop";

/// Frames present while a looper thread sits idle waiting for messages.
const LOOPER_IDLE: &[&str] = &[
    "android.os.MessageQueue.nativePollOnce",
    "android.os.MessageQueue.next",
];

/// Entry points of an incoming binder transaction.
const BINDER_DISPATCH: &[&str] = &[
    "android.os.Binder.execTransact",
    "android::IPCThreadState::executeCommand(int)",
];

const NATIVE_START_RUN: &str = "dalvik.system.NativeStart.run";

/// Client-side binder plumbing sitting above a generated proxy frame.
const BINDER_TRANSPORT_PREFIXES: &[&str] = &["android.os.BinderProxy.", "android.os.Binder."];

/// Blocking I/O that must not run on the main thread.
pub const FORBIDDEN_ON_MAIN_THREAD: &[&str] = &[
    "android.content.ContentResolver.",
    "org.apache.harmony.luni.internal.net.www.protocol.http.HttpURLConnectionImpl.",
    "org.apache.harmony.luni.internal.net.www.protocol.https.HttpURLConnectionImpl.",
    "org.apache.harmony.luni.internal.net.www.protocol.http.HttpsURLConnectionImpl.",
    "org.apache.harmony.luni.internal.net.www.protocol.https.HttpsURLConnectionImpl.",
    "org.apache.http.impl.client.AbstractHttpClient.execute",
    "android.database.sqlite.SQLiteDatabase.",
];

/// Name of the thread the main-thread policy applies to.
pub const MAIN_THREAD_NAME: &str = "main";

// ============================================================================
// Busy Classification
// ============================================================================

/// Why a thread was classified as busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// Looper thread handling a message
    LooperMessage,
    /// Binder thread serving an incoming call
    BinderTransaction,
    /// VM-started thread running Java code
    JavaWork,
}

/// Evidence that a thread is doing work: the reason and the frames showing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyMatch {
    pub reason: BusyReason,
    pub frames: Range<usize>,
}

/// Every busy pattern the stack of `thread` matches, in rule order.
#[must_use]
pub fn busy_matches(thread: &ThreadHandle) -> Vec<BusyMatch> {
    let mut matches = Vec::new();

    if let Some(idx) = thread.find_method(LOOPER_LOOP) {
        let idle = LOOPER_IDLE.iter().any(|m| thread.find_method(m).is_some());
        if !idle {
            matches.push(BusyMatch {
                reason: BusyReason::LooperMessage,
                frames: 0..idx,
            });
        }
    }

    for method in BINDER_DISPATCH {
        if let Some(idx) = thread.find_method(method) {
            matches.push(BusyMatch {
                reason: BusyReason::BinderTransaction,
                frames: 0..idx,
            });
        }
    }

    if let Some(idx) = thread.find_method(NATIVE_START_RUN) {
        if !thread.is_first_java_frame(idx) {
            matches.push(BusyMatch {
                reason: BusyReason::JavaWork,
                frames: 0..idx,
            });
        }
    }

    matches
}

// ============================================================================
// Policy and Proxy Detection
// ============================================================================

/// Returns true if `method` must not be called from the main thread.
#[must_use]
pub fn is_forbidden_on_main_thread(method: &str) -> bool {
    FORBIDDEN_ON_MAIN_THREAD
        .iter()
        .any(|prefix| method.starts_with(prefix))
}

/// A blocking call through a generated AIDL proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCall {
    /// Simple name of the interface (`IActivityManager`)
    pub interface: String,
    pub method: String,
    /// Index of the proxy frame in the stack
    pub frame: usize,
}

fn proxy_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:.*\.)?([^.]+)\$Stub\$Proxy\.(.+)$").expect("proxy pattern is valid")
    })
}

/// The outgoing AIDL call at the top of the stack, if any.
///
/// Binder transport frames above the proxy are skipped; any other Java frame
/// above it means the thread is no longer inside the call.
#[must_use]
pub fn proxy_call(thread: &ThreadHandle) -> Option<ProxyCall> {
    let (frame, method) = thread
        .frames
        .iter()
        .enumerate()
        .filter(|(_, f)| f.kind == FrameKind::Java)
        .filter_map(|(i, f)| f.method.as_deref().map(|m| (i, m)))
        .find(|(_, m)| !BINDER_TRANSPORT_PREFIXES.iter().any(|p| m.starts_with(p)))?;

    let caps = proxy_pattern().captures(method)?;
    Some(ProxyCall {
        interface: caps[1].to_string(),
        method: caps[2].to_string(),
        frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::CallFrame;

    fn thread(frames: Vec<CallFrame>) -> ThreadHandle {
        let mut t = ThreadHandle::new(1, 1, "t");
        t.frames = frames;
        t
    }

    #[test]
    fn test_idle_looper_is_not_busy() {
        let t = thread(vec![
            CallFrame::java("android.os.MessageQueue.nativePollOnce", "MessageQueue.java", 1),
            CallFrame::java("android.os.MessageQueue.next", "MessageQueue.java", 2),
            CallFrame::java(LOOPER_LOOP, "Looper.java", 3),
        ]);
        assert!(busy_matches(&t).is_empty());
    }

    #[test]
    fn test_looper_handling_message_is_busy() {
        let t = thread(vec![
            CallFrame::java("com.example.Worker.crunch", "Worker.java", 10),
            CallFrame::java("android.os.Handler.dispatchMessage", "Handler.java", 99),
            CallFrame::java(LOOPER_LOOP, "Looper.java", 3),
        ]);
        assert_eq!(
            busy_matches(&t),
            vec![BusyMatch {
                reason: BusyReason::LooperMessage,
                frames: 0..2
            }]
        );
    }

    #[test]
    fn test_native_binder_dispatch_is_busy() {
        let t = thread(vec![
            CallFrame::native("ioctl"),
            CallFrame::native("android::IPCThreadState::executeCommand(int)"),
        ]);
        let m = busy_matches(&t);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].reason, BusyReason::BinderTransaction);
    }

    #[test]
    fn test_native_start_run() {
        let idle = thread(vec![
            CallFrame::native("futex_wait"),
            CallFrame::java(NATIVE_START_RUN, "NativeStart.java", 0),
        ]);
        assert!(busy_matches(&idle).is_empty());

        let working = thread(vec![
            CallFrame::java("com.example.Task.run", "Task.java", 5),
            CallFrame::java(NATIVE_START_RUN, "NativeStart.java", 0),
        ]);
        assert_eq!(busy_matches(&working)[0].reason, BusyReason::JavaWork);
    }

    #[test]
    fn test_forbidden_prefixes() {
        assert!(is_forbidden_on_main_thread(
            "android.database.sqlite.SQLiteDatabase.rawQuery"
        ));
        assert!(is_forbidden_on_main_thread(
            "org.apache.http.impl.client.AbstractHttpClient.execute"
        ));
        assert!(!is_forbidden_on_main_thread("android.os.Looper.loop"));
    }

    #[test]
    fn test_proxy_call_below_transport_frames() {
        let t = thread(vec![
            CallFrame::native("ioctl"),
            CallFrame::java("android.os.BinderProxy.transactNative", "Binder.java", 0),
            CallFrame::java("android.os.BinderProxy.transact", "Binder.java", 1),
            CallFrame::java(
                "android.app.IActivityManager$Stub$Proxy.getRunningAppProcesses",
                "IActivityManager.java",
                2,
            ),
            CallFrame::java("com.example.Main.onCreate", "Main.java", 3),
        ]);
        let call = proxy_call(&t).unwrap();
        assert_eq!(call.interface, "IActivityManager");
        assert_eq!(call.method, "getRunningAppProcesses");
        assert_eq!(call.frame, 3);
    }

    #[test]
    fn test_proxy_call_must_be_at_top() {
        let t = thread(vec![
            CallFrame::java("com.example.Main.compute", "Main.java", 1),
            CallFrame::java("android.app.IFoo$Stub$Proxy.bar", "IFoo.java", 2),
        ]);
        assert_eq!(proxy_call(&t), None);
    }
}
