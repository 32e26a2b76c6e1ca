//! # Scheduler Trace Reconstructor
//!
//! Replays decoded [`SchedEvent`]s through a per-process state machine and
//! produces a [`TraceModel`]: one [`TraceRecord`] per event plus running,
//! waiting and I/O-wait statistics for every observed process.
//!
//! ## Contending count
//!
//! Each record carries the number of processes that wanted a CPU right after
//! the event, not counting the idle task. The count is maintained
//! incrementally: a process leaving a dormant state (`Sleeping`, `DiskWait`)
//! adds one, a process entering one removes one.
//!
//! ## Initial state inference
//!
//! A trace starts in the middle of things, so the state every process was in
//! before its first event is unknown and assumed `Sleeping`. The first
//! transition of a process can prove that assumption wrong:
//!
//! - switched in without a prior wakeup: it was already `Waiting`
//! - woken with raw state `D`: it was in `DiskWait`
//! - switched out while that added a contender: it was `Running`
//!
//! When the assumption was wrong the process had been contending since the
//! start of the trace, so every record emitted so far is corrected by the
//! same delta. Inference happens at most once per process.

use super::event::SchedEvent;
use super::histogram::ParallelHistogram;
use super::names::NameResolver;
use super::parser::{declared_tracer, default_formats, LineFormat};
use crate::domain::{Pid, Timestamp, TraceError};
use crate::metadata::ProcessMetadata;
use crate::section::{is_noise, Section};
use log::{debug, info, warn};
use postmortem_common::{EventKind, ProcessState};
use serde::Serialize;
use std::collections::BTreeMap;

/// Display name of the idle task.
pub const IDLE_NAME: &str = "SLEEP";

// ============================================================================
// Configuration
// ============================================================================

/// Library-side analysis settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Traces with fewer non-empty lines are rejected as too short
    pub min_trace_lines: usize,
    /// Allow inferring initial states for formats that support it
    pub guess_initial_state: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_trace_lines: 5,
            guess_initial_state: true,
        }
    }
}

// ============================================================================
// Output Model
// ============================================================================

/// One reconstructed scheduler event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    pub time: Timestamp,
    pub prev_pid: Pid,
    pub next_pid: Pid,
    pub prev_state: char,
    pub next_state: char,
    pub kind: EventKind,
    /// Processes wanting a CPU after this event, idle excluded
    pub contending: u32,
}

/// Per-process scheduling statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessTraceStats {
    pub pid: Pid,
    pub name: Option<String>,
    pub current_state: ProcessState,
    pub initial_state: ProcessState,
    pub initial_state_finalized: bool,
    /// Number of events this process took part in
    pub observation_count: u32,
    pub run_time_us: u64,
    pub wait_time_us: u64,
    pub wait_count: u32,
    pub wait_max_us: u64,
    pub disk_wait_time_us: u64,
    pub disk_wait_count: u32,
    pub disk_wait_max_us: u64,
    #[serde(skip)]
    last_transition: Option<Timestamp>,
}

impl ProcessTraceStats {
    fn new(pid: Pid, name: Option<String>) -> Self {
        Self {
            pid,
            name,
            current_state: ProcessState::Sleeping,
            initial_state: ProcessState::Sleeping,
            initial_state_finalized: false,
            observation_count: 0,
            run_time_us: 0,
            wait_time_us: 0,
            wait_count: 0,
            wait_max_us: 0,
            disk_wait_time_us: 0,
            disk_wait_count: 0,
            disk_wait_max_us: 0,
            last_transition: None,
        }
    }

    /// Resolved name, or the decimal pid.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.pid.0.to_string())
    }

    #[must_use]
    pub fn avg_wait_us(&self) -> u64 {
        self.wait_time_us / u64::from(self.wait_count.max(1))
    }

    #[must_use]
    pub fn avg_disk_wait_us(&self) -> u64 {
        self.disk_wait_time_us / u64::from(self.disk_wait_count.max(1))
    }

    /// Time spent waiting for a CPU per unit of time spent running.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn wait_over_run(&self) -> f64 {
        if self.run_time_us == 0 {
            0.0
        } else {
            self.wait_time_us as f64 / self.run_time_us as f64
        }
    }

    /// Charge the time since the previous transition to `held`, the state
    /// the process is leaving.
    fn close_interval(&mut self, held: ProcessState, now: Timestamp) {
        if let Some(last) = self.last_transition {
            let elapsed = now.saturating_since(last);
            match held {
                ProcessState::Running => self.run_time_us += elapsed,
                ProcessState::Waiting => {
                    self.wait_time_us += elapsed;
                    self.wait_count += 1;
                    self.wait_max_us = self.wait_max_us.max(elapsed);
                }
                ProcessState::DiskWait => {
                    self.disk_wait_time_us += elapsed;
                    self.disk_wait_count += 1;
                    self.disk_wait_max_us = self.disk_wait_max_us.max(elapsed);
                }
                ProcessState::Sleeping => {}
            }
        }
        self.last_transition = Some(now);
    }

    fn infer_initial_state(&mut self, state: ProcessState) {
        debug_assert!(
            !self.initial_state_finalized,
            "initial state of {} inferred after its first transition",
            self.pid
        );
        self.initial_state = state;
    }
}

/// Result of reconstructing one scheduler trace.
#[derive(Debug, Clone)]
pub struct TraceModel {
    format: &'static str,
    records: Vec<TraceRecord>,
    processes: BTreeMap<Pid, ProcessTraceStats>,
    skipped_lines: usize,
}

impl TraceModel {
    /// Name of the format the trace was read with.
    #[must_use]
    pub fn format(&self) -> &'static str {
        self.format
    }

    #[must_use]
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    #[must_use]
    pub fn process(&self, pid: Pid) -> Option<&ProcessTraceStats> {
        self.processes.get(&pid)
    }

    /// Observed processes, most CPU time first. Ties go to more time waiting
    /// for a CPU, then more time in I/O wait, then the lower pid.
    #[must_use]
    pub fn processes(&self) -> Vec<&ProcessTraceStats> {
        let mut list: Vec<_> = self
            .processes
            .values()
            .filter(|p| p.observation_count > 0)
            .collect();
        list.sort_by(|a, b| {
            b.run_time_us
                .cmp(&a.run_time_us)
                .then(b.wait_time_us.cmp(&a.wait_time_us))
                .then(b.disk_wait_time_us.cmp(&a.disk_wait_time_us))
                .then(a.pid.cmp(&b.pid))
        });
        list
    }

    /// Time between the first and the last record.
    #[must_use]
    pub fn duration_us(&self) -> u64 {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => last.time.saturating_since(first.time),
            _ => 0,
        }
    }

    /// Data lines that failed to parse and were skipped.
    #[must_use]
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    #[must_use]
    pub fn histogram(&self) -> ParallelHistogram {
        ParallelHistogram::from_records(&self.records)
    }
}

// ============================================================================
// Reconstructor
// ============================================================================

/// Turns a scheduler trace section into a [`TraceModel`].
///
/// The reconstructor itself holds only configuration; every run starts from
/// fresh state, so reconstructing the same section twice yields the same
/// model.
pub struct Reconstructor<'m> {
    metadata: &'m dyn ProcessMetadata,
    config: AnalysisConfig,
    formats: Vec<Box<dyn LineFormat>>,
}

impl<'m> Reconstructor<'m> {
    #[must_use]
    pub fn new(metadata: &'m dyn ProcessMetadata, config: AnalysisConfig) -> Self {
        Self::with_formats(metadata, config, default_formats())
    }

    #[must_use]
    pub fn with_formats(
        metadata: &'m dyn ProcessMetadata,
        config: AnalysisConfig,
        formats: Vec<Box<dyn LineFormat>>,
    ) -> Self {
        Self {
            metadata,
            config,
            formats,
        }
    }

    /// Reconstruct one trace.
    ///
    /// # Errors
    /// - [`TraceError::InsufficientData`] for traces shorter than the
    ///   configured minimum
    /// - [`TraceError::UnsupportedTracer`] when no format accepts the header
    /// - [`TraceError::EmptyTrace`] when no line yields an event
    pub fn reconstruct(&self, section: &dyn Section) -> Result<TraceModel, TraceError> {
        let usable = (0..section.line_count())
            .filter_map(|i| section.line(i))
            .filter(|l| !l.trim().is_empty())
            .count();
        if usable < self.config.min_trace_lines {
            return Err(TraceError::InsufficientData {
                found: usable,
                required: self.config.min_trace_lines,
            });
        }

        let tracer = section
            .line(0)
            .and_then(declared_tracer)
            .unwrap_or_default();
        let format = self
            .formats
            .iter()
            .find(|f| f.accepts(tracer))
            .ok_or_else(|| TraceError::UnsupportedTracer(tracer.to_string()))?;

        let guess = self.config.guess_initial_state && format.guesses_initial_state();
        let mut run = TraceRun::new(NameResolver::new(self.metadata), guess);
        let mut parser = format.line_parser();

        for idx in 0..section.line_count() {
            let Some(line) = section.line(idx) else {
                continue;
            };
            if is_noise(line) {
                continue;
            }
            match parser.parse(line) {
                Ok(Some(event)) => run.apply(&event),
                Ok(None) => {}
                Err(e) => {
                    debug!("{}:{}: skipping line: {e}", section.name(), idx + 1);
                    run.skipped_lines += 1;
                }
            }
        }

        if run.records.is_empty() {
            return Err(TraceError::EmptyTrace);
        }

        let model = run.finish(format.name());
        info!(
            "{}: {} records, {} processes, {} skipped lines ({} format)",
            section.name(),
            model.records.len(),
            model.processes().len(),
            model.skipped_lines,
            model.format
        );
        Ok(model)
    }
}

/// Mutable state of one reconstruction run.
struct TraceRun<'m> {
    names: NameResolver<'m>,
    guess_initial_state: bool,
    records: Vec<TraceRecord>,
    processes: BTreeMap<Pid, ProcessTraceStats>,
    contending: i64,
    idle_seen: bool,
    skipped_lines: usize,
}

impl<'m> TraceRun<'m> {
    fn new(names: NameResolver<'m>, guess_initial_state: bool) -> Self {
        Self {
            names,
            guess_initial_state,
            records: Vec::new(),
            processes: BTreeMap::new(),
            contending: 0,
            idle_seen: false,
            skipped_lines: 0,
        }
    }

    /// Create the process entry if needed and give it the trace-provided
    /// name when nothing better is known.
    fn touch(&mut self, pid: Pid, event_name: Option<&str>) {
        let names = &mut self.names;
        let proc = self.processes.entry(pid).or_insert_with(|| {
            let name = names
                .resolve(pid.0)
                .or_else(|| pid.is_idle().then(|| IDLE_NAME.to_string()));
            ProcessTraceStats::new(pid, name)
        });
        if proc.name.is_none() {
            if let Some(name) = event_name {
                proc.name = Some(format!("{}-{name}", pid.0));
            }
        }
    }

    fn apply(&mut self, event: &SchedEvent) {
        let src = event.source_pid;
        let dst = event.dest_pid;
        self.touch(src, event.source_name.as_deref());
        self.touch(dst, event.dest_name.as_deref());

        let mut count = self.contending;
        if event.kind == EventKind::Switch {
            let prev = ProcessState::from_switch_out(event.source_state);
            count += self.transition(src, prev, false, event.source_state, event.timestamp);
        }
        let next = if event.kind == EventKind::Wakeup {
            ProcessState::Waiting
        } else {
            ProcessState::Running
        };
        count += self.transition(dst, next, true, event.dest_state, event.timestamp);

        if count <= 0 {
            warn!(
                "contending count {count} at {} ({} -> {}), clamping to 1",
                event.timestamp, src, dst
            );
            count = 1;
        }
        self.contending = count;

        self.records.push(TraceRecord {
            time: event.timestamp,
            prev_pid: src,
            next_pid: dst,
            prev_state: event.source_state,
            next_state: event.dest_state,
            kind: event.kind,
            contending: u32::try_from(count - 1).unwrap_or(u32::MAX),
        });

        for pid in [src, dst] {
            if let Some(proc) = self.processes.get_mut(&pid) {
                proc.observation_count += 1;
            }
        }
        if src.is_idle() || dst.is_idle() {
            self.idle_seen = true;
        }
    }

    /// Move `pid` to `new_state` and return the change in the contending
    /// count. `arrival` is true when the process is the event's destination.
    fn transition(
        &mut self,
        pid: Pid,
        new_state: ProcessState,
        arrival: bool,
        raw_state: char,
        now: Timestamp,
    ) -> i64 {
        let Some(proc) = self.processes.get_mut(&pid) else {
            return 0;
        };
        let old_state = proc.current_state;

        let mut delta = 0;
        if old_state != new_state {
            if old_state.is_dormant() {
                delta += 1;
            }
            if new_state.is_dormant() {
                delta -= 1;
            }
            proc.close_interval(old_state, now);
        }

        let mut correction = 0;
        if self.guess_initial_state && !proc.initial_state_finalized {
            if arrival {
                if old_state == ProcessState::Sleeping && new_state == ProcessState::Running {
                    // Switched in without a wakeup: it was already runnable.
                    proc.infer_initial_state(ProcessState::Waiting);
                    correction = delta;
                } else if old_state == ProcessState::Sleeping
                    && new_state == ProcessState::Waiting
                    && raw_state == 'D'
                {
                    proc.infer_initial_state(ProcessState::DiskWait);
                }
            } else if delta == 1 {
                proc.infer_initial_state(ProcessState::Running);
                correction = delta;
            }
        }
        proc.initial_state_finalized = true;
        proc.current_state = new_state;

        if correction != 0 {
            debug!("{pid}: initial state corrected at {now}, shifting history by {correction}");
            self.shift_contending(correction);
        }
        delta
    }

    /// Apply `delta` to every record emitted so far.
    fn shift_contending(&mut self, delta: i64) {
        for record in &mut self.records {
            let shifted = i64::from(record.contending) + delta;
            record.contending = u32::try_from(shifted.max(0)).unwrap_or(u32::MAX);
        }
    }

    fn finish(mut self, format: &'static str) -> TraceModel {
        // Without idle events the idle task was never counted as running.
        if !self.idle_seen {
            self.shift_contending(1);
        }
        TraceModel {
            format,
            records: self.records,
            processes: self.processes,
            skipped_lines: self.skipped_lines,
        }
    }
}
