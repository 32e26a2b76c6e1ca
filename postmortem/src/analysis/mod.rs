//! Analysis driver.
//!
//! Runs the scheduler-trace reconstruction and the thread-dump analyzers
//! over whatever inputs are available and gathers the results into one
//! [`Report`]. The sources are independent: a trace that cannot be used is
//! recorded in [`Report::errors`] and the dumps are still analyzed, and
//! vice versa.

use crate::domain::{DumpError, TraceError};
use crate::findings::{sort_by_priority, Finding};
use crate::metadata::{NoMetadata, ProcessMetadata};
use crate::sched::{
    AnalysisConfig, ParallelHistogram, ProcessTraceStats, Reconstructor, TraceModel, TraceRecord,
};
use crate::section::Section;
use crate::threads::{self, AidlResolver, DeadlockGroup, NoAidl, WaitGraph};
use log::{info, warn};
use postmortem_common::ThreadDump;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// ============================================================================
// Report Types
// ============================================================================

/// Serializable view of a [`TraceModel`].
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub format: String,
    pub duration_us: u64,
    pub skipped_lines: usize,
    pub processes: Vec<ProcessTraceStats>,
    pub records: Vec<TraceRecord>,
    pub histogram: ParallelHistogram,
}

impl From<&TraceModel> for TraceSummary {
    fn from(model: &TraceModel) -> Self {
        Self {
            format: model.format().to_string(),
            duration_us: model.duration_us(),
            skipped_lines: model.skipped_lines(),
            processes: model.processes().into_iter().cloned().collect(),
            records: model.records().to_vec(),
            histogram: model.histogram(),
        }
    }
}

/// Results for one thread dump.
#[derive(Debug, Clone, Serialize)]
pub struct DumpAnalysis {
    pub name: String,
    pub graph: WaitGraph,
    pub deadlocks: Vec<DeadlockGroup>,
    #[serde(skip)]
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub trace: Option<TraceSummary>,
    pub dumps: Vec<DumpAnalysis>,
    /// All findings, highest priority first
    pub findings: Vec<Finding>,
    /// Inputs that had to be abandoned, one message each
    pub errors: Vec<String>,
}

// ============================================================================
// Single-Source Entry Points
// ============================================================================

/// Reconstruct a scheduler trace.
///
/// # Errors
/// Returns a [`TraceError`] when the trace as a whole is unusable.
pub fn analyze_trace(
    section: &dyn Section,
    metadata: &dyn ProcessMetadata,
    config: AnalysisConfig,
) -> Result<TraceModel, TraceError> {
    Reconstructor::new(metadata, config).reconstruct(section)
}

/// Read thread dumps from a JSON array of snapshots.
///
/// # Errors
/// Returns [`DumpError::Io`] or [`DumpError::Json`] if the file cannot be
/// read or decoded.
pub fn load_dumps(path: &Path) -> Result<Vec<ThreadDump>, DumpError> {
    let file = File::open(path)?;
    let dumps: Vec<ThreadDump> = serde_json::from_reader(BufReader::new(file))?;
    info!("Loaded {} thread dumps from {}", dumps.len(), path.display());
    Ok(dumps)
}

/// Reject dumps the graph analysis cannot work with.
///
/// # Errors
/// - [`DumpError::NoProcesses`] for an empty dump
/// - [`DumpError::DuplicatePid`] when two snapshots share a pid; threads are
///   keyed by `(pid, tid)`, so the second one could never be reached
/// - [`DumpError::DuplicateTid`] when a process lists a tid twice
pub fn validate_dump(dump: &ThreadDump) -> Result<(), DumpError> {
    if dump.processes.is_empty() {
        return Err(DumpError::NoProcesses(dump.name.clone()));
    }
    let mut pids = HashSet::new();
    for process in &dump.processes {
        if !pids.insert(process.pid) {
            return Err(DumpError::DuplicatePid {
                dump: dump.name.clone(),
                pid: process.pid,
            });
        }
        let mut seen = HashSet::new();
        for thread in &process.threads {
            if !seen.insert(thread.tid) {
                return Err(DumpError::DuplicateTid {
                    dump: dump.name.clone(),
                    pid: process.pid,
                    tid: thread.tid,
                });
            }
        }
    }
    Ok(())
}

/// Build the wait graph of `dump`, then look for main-thread violations and
/// deadlocks. Frame styles in `dump` are updated along the way.
///
/// # Errors
/// Returns a [`DumpError`] if the dump fails validation.
pub fn analyze_dump(
    dump: &mut ThreadDump,
    resolver: &dyn AidlResolver,
) -> Result<DumpAnalysis, DumpError> {
    validate_dump(dump)?;
    dump.adopt_threads();

    let graph = threads::build(dump, resolver);
    let mut findings = threads::check_main_threads(dump);
    let deadlocks = threads::detect(dump);
    findings.extend(threads::deadlock_findings(dump, &deadlocks));

    info!(
        "{}: {} busy threads, {} deadlocks, {} findings",
        dump.name,
        graph.busy.len(),
        deadlocks.len(),
        findings.len()
    );

    Ok(DumpAnalysis {
        name: dump.name.clone(),
        graph,
        deadlocks,
        findings,
    })
}

// ============================================================================
// Combined Driver
// ============================================================================

/// Collaborators and settings for a full analysis.
pub struct Analysis<'a> {
    metadata: &'a dyn ProcessMetadata,
    resolver: &'a dyn AidlResolver,
    config: AnalysisConfig,
}

impl Default for Analysis<'_> {
    fn default() -> Self {
        Self {
            metadata: &NoMetadata,
            resolver: &NoAidl,
            config: AnalysisConfig::default(),
        }
    }
}

impl<'a> Analysis<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: &'a dyn ProcessMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: &'a dyn AidlResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Analyze every available source.
    #[must_use]
    pub fn run(&self, trace: Option<&dyn Section>, dumps: &mut [ThreadDump]) -> Report {
        let mut report = Report::default();

        if let Some(section) = trace {
            match analyze_trace(section, self.metadata, self.config) {
                Ok(model) => report.trace = Some(TraceSummary::from(&model)),
                Err(e) => {
                    warn!("{}: trace not analyzed: {e}", section.name());
                    report.errors.push(format!("{}: {e}", section.name()));
                }
            }
        }

        for dump in dumps.iter_mut() {
            match analyze_dump(dump, self.resolver) {
                Ok(analysis) => {
                    report.findings.extend(analysis.findings.iter().cloned());
                    report.dumps.push(analysis);
                }
                Err(e) => {
                    warn!("{}: thread dump not analyzed: {e}", dump.name);
                    report.errors.push(format!("{}: {e}", dump.name));
                }
            }
        }

        sort_by_priority(&mut report.findings);
        report
    }
}
