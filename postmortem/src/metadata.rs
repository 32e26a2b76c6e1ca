//! Process metadata lookup (pid → base name, parent pid).
//!
//! The trace reconstructor only needs two questions answered about a pid.
//! [`StaticMetadata`] answers them from a JSON map or from the output of
//! `ps -A -T` captured next to the trace.

use crate::section::Section;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parent pid reported when nothing is known about a process.
pub const UNKNOWN_PARENT: i32 = -1;

pub trait ProcessMetadata {
    /// Short name of `pid`, without any parent prefix.
    fn base_name_of(&self, pid: u32) -> Option<String>;

    /// Parent pid of `pid`, [`UNKNOWN_PARENT`] if unknown.
    fn parent_pid_of(&self, pid: u32) -> i32;
}

/// Knows nothing; every process falls back to trace-provided names.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl ProcessMetadata for NoMetadata {
    fn base_name_of(&self, _pid: u32) -> Option<String> {
        None
    }

    fn parent_pid_of(&self, _pid: u32) -> i32 {
        UNKNOWN_PARENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub name: String,
    #[serde(default = "unknown_parent")]
    pub ppid: i32,
}

fn unknown_parent() -> i32 {
    UNKNOWN_PARENT
}

/// Map-backed metadata.
///
/// JSON form: `{"processes": {"1": {"name": "init", "ppid": 0}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticMetadata {
    #[serde(default)]
    processes: HashMap<u32, ProcessEntry>,
}

impl StaticMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pid: u32, name: impl Into<String>, ppid: i32) {
        self.processes.insert(
            pid,
            ProcessEntry {
                name: name.into(),
                ppid,
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Build from `ps -A -T` output (`LABEL USER PID TID PPID ... CMD`).
    ///
    /// Only the main thread row of each process (`PID == TID`) is used; the
    /// name is the `CMD` column. Rows that do not parse are skipped.
    #[must_use]
    pub fn from_ps_section(section: &dyn Section) -> Self {
        let mut meta = Self::new();
        let mut columns: Option<PsColumns> = None;

        for idx in 0..section.line_count() {
            let Some(line) = section.line(idx) else {
                continue;
            };
            let Some(cols) = columns else {
                columns = PsColumns::from_header(line);
                continue;
            };
            if line.starts_with('[') {
                break;
            }
            match cols.parse_row(line) {
                Some((pid, tid, ppid, name)) if pid == tid => meta.insert(pid, name, ppid),
                Some(_) => {}
                None => debug!("{}: skipping ps row: {line}", section.name()),
            }
        }

        if columns.is_none() {
            debug!("{}: no ps header found", section.name());
        }
        meta
    }
}

impl ProcessMetadata for StaticMetadata {
    fn base_name_of(&self, pid: u32) -> Option<String> {
        self.processes.get(&pid).map(|e| e.name.clone())
    }

    fn parent_pid_of(&self, pid: u32) -> i32 {
        self.processes.get(&pid).map_or(UNKNOWN_PARENT, |e| e.ppid)
    }
}

/// Column positions found in a `ps` header line.
#[derive(Debug, Clone, Copy)]
struct PsColumns {
    pid: usize,
    tid: usize,
    ppid: usize,
    count: usize,
}

impl PsColumns {
    fn from_header(line: &str) -> Option<Self> {
        let names: Vec<&str> = line.split_whitespace().collect();
        let find = |col: &str| names.iter().position(|n| *n == col);
        let pid = find("PID")?;
        let ppid = find("PPID")?;
        // Without a TID column every row is a process row.
        let tid = find("TID").unwrap_or(pid);
        find("CMD").or_else(|| find("NAME"))?;
        Some(Self {
            pid,
            tid,
            ppid,
            count: names.len(),
        })
    }

    /// The command may contain spaces, so it is everything past the
    /// second-to-last header column.
    fn parse_row(self, line: &str) -> Option<(u32, u32, i32, String)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < self.count {
            return None;
        }
        let pid = fields.get(self.pid)?.parse().ok()?;
        let tid = fields.get(self.tid)?.parse().ok()?;
        let ppid = fields.get(self.ppid)?.parse().ok()?;
        let name = fields[self.count - 1..].join(" ");
        Some((pid, tid, ppid, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::LineSection;

    const PS_DATA: &str = "\
LABEL                          USER           PID   TID  PPID     VSZ    RSS WCHAN            ADDR S PRI  NI RTPRIO SCH PCY     TIME CMD
u:r:init:s0                    root             1     1     0   73884   4768 0                   0 S  19   0      -   0  fg 00:00:02 init
u:r:kernel:s0                  root             2     2     0       0      0 0                   0 S  19   0      -   0  fg 00:00:00 kthreadd
u:r:priv_app:s0:c512,c768      u0_a217       4064  4064   814 7272312 159480 0                   0 S  29 -10      -   0  ta 00:04:24 earchbox:search
u:r:priv_app:s0:c512,c768      u0_a217       4064  4074   814 7272312 159480 0                   0 S  19   0      -   0  ta 00:00:04 Jit thread pool
[ps: exited]";

    #[test]
    fn test_no_metadata() {
        assert_eq!(NoMetadata.base_name_of(1), None);
        assert_eq!(NoMetadata.parent_pid_of(1), UNKNOWN_PARENT);
    }

    #[test]
    fn test_static_metadata_from_json() {
        let json = r#"{"processes": {"42": {"name": "surfaceflinger", "ppid": 1}, "7": {"name": "x"}}}"#;
        let meta: StaticMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.base_name_of(42).as_deref(), Some("surfaceflinger"));
        assert_eq!(meta.parent_pid_of(42), 1);
        assert_eq!(meta.parent_pid_of(7), UNKNOWN_PARENT);
        assert_eq!(meta.base_name_of(43), None);
    }

    #[test]
    fn test_from_ps_section_uses_process_rows_only() {
        let section = LineSection::from_text("ps", PS_DATA);
        let meta = StaticMetadata::from_ps_section(&section);

        assert_eq!(meta.len(), 3);
        assert_eq!(meta.base_name_of(1).as_deref(), Some("init"));
        assert_eq!(meta.parent_pid_of(2), 0);
        assert_eq!(meta.base_name_of(4064).as_deref(), Some("earchbox:search"));
        assert_eq!(meta.parent_pid_of(4064), 814);
    }

    #[test]
    fn test_from_ps_section_without_header() {
        let section = LineSection::from_text("ps", "garbage\nmore garbage");
        assert!(StaticMetadata::from_ps_section(&section).is_empty());
    }
}
