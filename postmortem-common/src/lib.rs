//! # Shared Data Model (Scheduler Trace ↔ Thread Dumps)
//!
//! Defines the data structures shared between the scheduler-trace
//! reconstructor, the wait-graph builder and whatever loads thread dumps
//! (a JSON file, a bugreport splitter, a live capture tool). Enabling the
//! `serde` feature makes every type here (de)serializable so loaders can
//! hand fully populated snapshots across a process boundary.
//!
//! ## Key Types
//!
//! - [`ProcessState`] - Scheduler state of a process during a trace
//! - [`EventKind`] - Kind of a single scheduler trace event
//! - [`ThreadHandle`] - One captured thread inside one process snapshot
//! - [`ProcessSnapshot`] - One captured process
//! - [`ThreadDump`] - One capture group of process snapshots
//! - [`ThreadRef`] - Stable `(pid, tid)` key used for every graph edge

use std::fmt;
use std::ops::Range;

// ============================================================================
// Scheduler Model
// ============================================================================

/// Scheduler state of a process as seen by the trace reconstructor.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessState {
    /// Not runnable (interruptible sleep, stopped, dead, ...)
    #[default]
    Sleeping,
    /// Runnable but not scheduled on a CPU
    Waiting,
    /// Currently executing on a CPU
    Running,
    /// Blocked in uninterruptible I/O
    DiskWait,
}

impl ProcessState {
    /// State a process leaves behind when it is switched out, derived from
    /// the raw scheduler state letter of the outgoing task.
    ///
    /// A task switched out while still `R` was preempted and keeps waiting
    /// for the CPU.
    #[must_use]
    pub fn from_switch_out(state: char) -> Self {
        match state {
            'R' => ProcessState::Waiting,
            'D' => ProcessState::DiskWait,
            _ => ProcessState::Sleeping,
        }
    }

    /// Returns true for states that do not compete for a CPU.
    #[must_use]
    pub fn is_dormant(self) -> bool {
        matches!(self, ProcessState::Sleeping | ProcessState::DiskWait)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Sleeping => "sleeping",
            ProcessState::Waiting => "waiting",
            ProcessState::Running => "running",
            ProcessState::DiskWait => "disk-wait",
        };
        f.write_str(s)
    }
}

/// Kind of a scheduler trace event.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The CPU moved from the source task to the destination task
    Switch,
    /// The destination task became runnable without taking the CPU yet
    Wakeup,
    /// Anything else the tracer emitted
    Unknown,
}

// ============================================================================
// Thread Dump Model
// ============================================================================

/// Stable key of a captured thread: owning process id plus thread id.
///
/// Every dependency edge in the wait graph is expressed as a `ThreadRef`
/// rather than a reference, so snapshots can point at each other across
/// processes without shared ownership.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadRef {
    pub pid: u32,
    pub tid: u32,
}

impl ThreadRef {
    #[must_use]
    pub fn new(pid: u32, tid: u32) -> Self {
        Self { pid, tid }
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.tid)
    }
}

/// Origin of a call frame.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameKind {
    #[default]
    Java,
    Native,
}

/// Highlighting hint attached to a frame for downstream rendering.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStyle {
    #[default]
    Normal,
    /// Frame of a thread that is demonstrably doing work
    Busy,
    /// Frame involved in a policy violation
    Error,
}

/// One frame of a captured call stack.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallFrame {
    /// Fully qualified method name (Java) or symbol (native), if known
    pub method: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub kind: FrameKind,
    pub style: FrameStyle,
}

impl CallFrame {
    /// Java frame with a known source location.
    #[must_use]
    pub fn java(method: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            method: Some(method.into()),
            file: Some(file.into()),
            line: Some(line),
            kind: FrameKind::Java,
            style: FrameStyle::Normal,
        }
    }

    /// Native frame; only the symbol is kept.
    #[must_use]
    pub fn native(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            kind: FrameKind::Native,
            ..Self::default()
        }
    }

    /// `method(file:line)` as printed in thread dumps.
    #[must_use]
    pub fn location(&self) -> String {
        let method = self.method.as_deref().unwrap_or("?");
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{method}({file}:{line})"),
            (Some(file), None) => format!("{method}({file})"),
            _ => method.to_string(),
        }
    }
}

/// "Waiting to lock ... held by tid=N" information of a blocked thread.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitInfo {
    /// Thread id (within the same process) holding the contended lock
    pub tid: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lock_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lock_type: Option<String>,
}

/// One captured thread inside one process snapshot.
///
/// A thread has at most one live outgoing dependency: `wait_on` takes
/// precedence over `aidl_dependency` whenever it resolves.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadHandle {
    /// Owning process id
    pub pid: u32,
    /// Thread id as printed by the VM (unique within the process)
    pub tid: u32,
    /// Kernel thread id (`sysTid=`), used to correlate binder transactions
    pub sys_tid: Option<u32>,
    pub name: String,
    pub priority: i32,
    /// VM thread state (`Blocked`, `Native`, `Runnable`, ...)
    pub state: String,
    pub wait_on: Option<WaitInfo>,
    /// Remote thread servicing a blocking cross-process call
    pub aidl_dependency: Option<ThreadRef>,
    /// Call stack, innermost frame first
    pub frames: Vec<CallFrame>,
}

impl ThreadHandle {
    #[must_use]
    pub fn new(pid: u32, tid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            tid,
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn thread_ref(&self) -> ThreadRef {
        ThreadRef::new(self.pid, self.tid)
    }

    /// Index of the first (innermost) frame whose method equals `method`.
    #[must_use]
    pub fn find_method(&self, method: &str) -> Option<usize> {
        self.frames
            .iter()
            .position(|f| f.method.as_deref() == Some(method))
    }

    /// Returns true when no Java frame sits above (inner to) `idx`.
    #[must_use]
    pub fn is_first_java_frame(&self, idx: usize) -> bool {
        self.frames
            .iter()
            .take(idx)
            .all(|f| f.kind != FrameKind::Java)
    }

    /// Apply `style` to the frames in `range`, clamped to the stack.
    pub fn set_style(&mut self, range: Range<usize>, style: FrameStyle) {
        let end = range.end.min(self.frames.len());
        let start = range.start.min(end);
        for frame in &mut self.frames[start..end] {
            frame.style = style;
        }
    }
}

/// One captured process.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub threads: Vec<ThreadHandle>,
}

impl ProcessSnapshot {
    #[must_use]
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            threads: Vec::new(),
        }
    }

    /// Add a thread, forcing its owning pid to this process.
    pub fn push(&mut self, mut thread: ThreadHandle) {
        thread.pid = self.pid;
        self.threads.push(thread);
    }

    #[must_use]
    pub fn find_tid(&self, tid: u32) -> Option<&ThreadHandle> {
        self.threads.iter().find(|t| t.tid == tid)
    }

    pub fn find_tid_mut(&mut self, tid: u32) -> Option<&mut ThreadHandle> {
        self.threads.iter_mut().find(|t| t.tid == tid)
    }

    /// Look a thread up by its kernel thread id.
    #[must_use]
    pub fn find_sys_tid(&self, sys_tid: u32) -> Option<&ThreadHandle> {
        self.threads.iter().find(|t| t.sys_tid == Some(sys_tid))
    }
}

/// One capture group of process snapshots (for example "VM traces at last
/// ANR"). Dependency edges never leave the group they were captured in.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadDump {
    pub name: String,
    pub processes: Vec<ProcessSnapshot>,
}

impl ThreadDump {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processes: Vec::new(),
        }
    }

    /// Force every thread's `pid` to its owning process. Loaders may leave
    /// it unset.
    pub fn adopt_threads(&mut self) {
        for process in &mut self.processes {
            for thread in &mut process.threads {
                thread.pid = process.pid;
            }
        }
    }

    #[must_use]
    pub fn find_process(&self, pid: u32) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    #[must_use]
    pub fn find_thread(&self, thread: ThreadRef) -> Option<&ThreadHandle> {
        self.find_process(thread.pid)?.find_tid(thread.tid)
    }

    pub fn find_thread_mut(&mut self, thread: ThreadRef) -> Option<&mut ThreadHandle> {
        self.processes
            .iter_mut()
            .find(|p| p.pid == thread.pid)?
            .find_tid_mut(thread.tid)
    }

    /// Every thread of every process, in capture order.
    pub fn threads(&self) -> impl Iterator<Item = &ThreadHandle> {
        self.processes.iter().flat_map(|p| p.threads.iter())
    }

    /// Every thread key, in capture order.
    #[must_use]
    pub fn thread_refs(&self) -> Vec<ThreadRef> {
        self.threads().map(ThreadHandle::thread_ref).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_thread() -> ThreadHandle {
        let mut t = ThreadHandle::new(100, 1, "main");
        t.frames = vec![
            CallFrame::native("epoll_wait"),
            CallFrame::java("android.os.MessageQueue.nativePollOnce", "MessageQueue.java", 12),
            CallFrame::java("android.os.Looper.loop", "Looper.java", 40),
        ];
        t
    }

    #[test]
    fn test_switch_out_state_mapping() {
        assert_eq!(ProcessState::from_switch_out('R'), ProcessState::Waiting);
        assert_eq!(ProcessState::from_switch_out('D'), ProcessState::DiskWait);
        assert_eq!(ProcessState::from_switch_out('S'), ProcessState::Sleeping);
        assert_eq!(ProcessState::from_switch_out('x'), ProcessState::Sleeping);
    }

    #[test]
    fn test_find_method_and_first_java_frame() {
        let t = sample_thread();
        assert_eq!(t.find_method("android.os.Looper.loop"), Some(2));
        assert_eq!(t.find_method("missing"), None);
        assert!(t.is_first_java_frame(1));
        assert!(!t.is_first_java_frame(2));
    }

    #[test]
    fn test_set_style_is_clamped() {
        let mut t = sample_thread();
        t.set_style(1..10, FrameStyle::Busy);
        assert_eq!(t.frames[0].style, FrameStyle::Normal);
        assert_eq!(t.frames[1].style, FrameStyle::Busy);
        assert_eq!(t.frames[2].style, FrameStyle::Busy);
    }

    #[test]
    fn test_dump_lookup() {
        let mut proc = ProcessSnapshot::new(100, "com.example");
        proc.push(sample_thread());
        let mut dump = ThreadDump::new("now");
        dump.processes.push(proc);

        assert!(dump.find_thread(ThreadRef::new(100, 1)).is_some());
        assert!(dump.find_thread(ThreadRef::new(100, 2)).is_none());
        assert!(dump.find_thread(ThreadRef::new(101, 1)).is_none());
        assert_eq!(dump.thread_refs(), vec![ThreadRef::new(100, 1)]);
    }

    #[test]
    fn test_frame_location() {
        let f = CallFrame::java("a.B.c", "B.java", 7);
        assert_eq!(f.location(), "a.B.c(B.java:7)");
        assert_eq!(CallFrame::native("memcpy").location(), "memcpy");
    }
}
