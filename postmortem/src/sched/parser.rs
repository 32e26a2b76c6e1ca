//! Trace line parsers.
//!
//! Two layouts of the kernel scheduler trace are understood, each behind a
//! [`LineFormat`] strategy selected from the `# tracer:` header:
//!
//! - [`LegacyFormat`]: output of the old `sched_switch` tracer
//!
//!   ```text
//!             <idle>-0     [000]  1234.567890:      0:140:R   + [000]   123:120:S kworker/0:1
//!   ```
//!
//! - [`EventFormat`]: the `nop` tracer with `sched:*` events enabled
//!
//!   ```text
//!             <idle>-0     [000]  1234.567890: sched_switch: prev_comm=swapper prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=kworker/0:1 next_pid=12 next_prio=120
//!   ```
//!
//! Both share the line prefix: a 16 column right-aligned task name, `-`,
//! the pid, the CPU field and a `secs.micros:` timestamp.

use super::event::{task_name, SchedEvent};
use crate::domain::{ParseError, Pid, Timestamp};
use postmortem_common::EventKind;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Width of the right-aligned task name column.
const NAME_WIDTH: usize = 16;

/// A trace layout, selected by the tracer named in the header.
pub trait LineFormat {
    fn name(&self) -> &'static str;

    /// Returns true if this format handles traces of `tracer`.
    fn accepts(&self, tracer: &str) -> bool;

    /// Whether the reconstructor may infer the initial state of processes
    /// from their first transition.
    fn guesses_initial_state(&self) -> bool;

    /// Fresh parser for one run over one trace.
    fn line_parser(&self) -> Box<dyn LineParser>;
}

pub trait LineParser {
    /// Decode one data line. `Ok(None)` means the line is valid but carries
    /// nothing the reconstructor uses.
    ///
    /// # Errors
    /// Returns a [`ParseError`] describing the first malformed field.
    fn parse(&mut self, line: &str) -> Result<Option<SchedEvent>, ParseError>;
}

/// Formats tried in order when reconstructing a trace.
#[must_use]
pub fn default_formats() -> Vec<Box<dyn LineFormat>> {
    vec![Box::new(LegacyFormat), Box::new(EventFormat)]
}

/// Tracer declared by a `# tracer: <name>` header line.
#[must_use]
pub fn declared_tracer(header: &str) -> Option<&str> {
    header
        .trim()
        .strip_prefix('#')?
        .trim_start()
        .strip_prefix("tracer:")
        .map(str::trim)
}

// ============================================================================
// Field Cursor
// ============================================================================

/// Byte cursor over an ASCII-delimited line.
///
/// Delimiters are all ASCII, so every slice boundary the cursor produces
/// falls on a char boundary even when task names are not ASCII.
struct Cursor<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str, pos: usize) -> Self {
        Self { line, pos }
    }

    fn bytes(&self) -> &'a [u8] {
        self.line.as_bytes()
    }

    fn skip_spaces(&mut self) {
        while self.bytes().get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    fn skip_token(&mut self) {
        while matches!(self.bytes().get(self.pos), Some(b) if *b != b' ') {
            self.pos += 1;
        }
    }

    /// Skip a space-delimited field together with the spaces around it.
    fn skip_field(&mut self) {
        self.skip_spaces();
        self.skip_token();
        self.skip_spaces();
    }

    /// Text up to (not including) `delim`; the cursor stops on `delim`.
    fn take_until(&mut self, delim: u8, field: &'static str) -> Result<&'a str, ParseError> {
        let rest = self.bytes().get(self.pos..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|b| *b == delim)
            .ok_or(ParseError::Truncated(field))?;
        let start = self.pos;
        self.pos += len;
        self.line
            .get(start..self.pos)
            .ok_or(ParseError::Truncated(field))
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a str, ParseError> {
        let s = self
            .line
            .get(self.pos..self.pos + len)
            .ok_or(ParseError::Truncated(field))?;
        self.pos += len;
        Ok(s)
    }

    fn next_char(&mut self, field: &'static str) -> Result<char, ParseError> {
        let c = self
            .line
            .get(self.pos..)
            .and_then(|s| s.chars().next())
            .ok_or(ParseError::Truncated(field))?;
        self.pos += c.len_utf8();
        Ok(c)
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn rest(&self) -> &'a str {
        self.line.get(self.pos..).unwrap_or_default()
    }
}

/// Common prefix of both layouts.
struct LinePrefix<'a> {
    name: Option<String>,
    pid: Pid,
    timestamp: Timestamp,
    cursor: Cursor<'a>,
}

/// Parse `name-pid [cpu] [flags] secs.micros:` and leave the cursor just
/// past the timestamp colon.
fn parse_prefix(line: &str) -> Result<LinePrefix<'_>, ParseError> {
    let name_field = line
        .get(..NAME_WIDTH)
        .ok_or(ParseError::Truncated("source name"))?;
    if line.as_bytes().get(NAME_WIDTH) != Some(&b'-') {
        return Err(ParseError::MissingField("'-' after source name"));
    }

    let mut cursor = Cursor::new(line, NAME_WIDTH + 1);
    let pid = parse_pid(cursor.take_until(b' ', "CPU field")?)?;
    cursor.skip_field();

    // Event traces may carry an irq-flags column before the timestamp.
    let stamp = cursor.take_until(b':', "timestamp")?;
    let stamp = stamp.split_whitespace().next_back().unwrap_or_default();
    let timestamp = parse_timestamp(stamp)?;
    cursor.advance(1);

    Ok(LinePrefix {
        name: task_name(name_field),
        pid,
        timestamp,
        cursor,
    })
}

fn parse_pid(s: &str) -> Result<Pid, ParseError> {
    s.trim()
        .parse::<u32>()
        .map(Pid)
        .map_err(|_| ParseError::InvalidPid(s.to_string()))
}

/// Convert `secs.fraction` to microseconds without floating point. The
/// fraction is padded or truncated to six digits.
fn parse_timestamp(s: &str) -> Result<Timestamp, ParseError> {
    let invalid = || ParseError::InvalidTimestamp(s.to_string());
    let (secs, frac) = s.split_once('.').unwrap_or((s, ""));
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let secs: u64 = secs.parse().map_err(|_| invalid())?;
    let mut micros = 0u64;
    for i in 0..6 {
        let digit = frac.as_bytes().get(i).map_or(0, |b| u64::from(b - b'0'));
        micros = micros * 10 + digit;
    }
    secs.checked_mul(1_000_000)
        .and_then(|us| us.checked_add(micros))
        .map(Timestamp)
        .ok_or_else(invalid)
}

// ============================================================================
// Legacy sched_switch Tracer
// ============================================================================

/// Layout of the `sched_switch` tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyFormat;

impl LineFormat for LegacyFormat {
    fn name(&self) -> &'static str {
        "sched_switch"
    }

    fn accepts(&self, tracer: &str) -> bool {
        tracer == "sched_switch"
    }

    fn guesses_initial_state(&self) -> bool {
        true
    }

    fn line_parser(&self) -> Box<dyn LineParser> {
        Box::new(LegacyParser)
    }
}

#[derive(Debug, Default)]
struct LegacyParser;

impl LineParser for LegacyParser {
    fn parse(&mut self, line: &str) -> Result<Option<SchedEvent>, ParseError> {
        parse_legacy_line(line).map(Some)
    }
}

/// Decode one `sched_switch` tracer line.
///
/// # Errors
/// Returns a [`ParseError`] naming the first field that is missing or
/// malformed.
pub fn parse_legacy_line(line: &str) -> Result<SchedEvent, ParseError> {
    let LinePrefix {
        name: source_name,
        pid: source_pid,
        timestamp,
        mut cursor,
    } = parse_prefix(line)?;

    // Source pid and prio repeat here; both are ignored.
    cursor.take_until(b':', "source prio")?;
    cursor.advance(1);
    cursor.take_until(b':', "source state")?;
    cursor.advance(1);
    let source_state = cursor.next_char("source state")?;
    cursor.advance(1);

    let kind = match cursor.take(3, "event marker")? {
        "==>" => EventKind::Switch,
        "  +" => EventKind::Wakeup,
        _ => EventKind::Unknown,
    };

    cursor.skip_field();
    let dest_pid = parse_pid(cursor.take_until(b':', "dest prio")?)?;
    cursor.advance(1);
    cursor.take_until(b':', "dest state")?;
    cursor.advance(1);
    let dest_state = cursor.next_char("dest state")?;
    cursor.advance(1);
    let dest_name = task_name(cursor.rest());

    Ok(SchedEvent {
        source_pid,
        source_state,
        source_name,
        dest_pid,
        dest_state,
        dest_name,
        timestamp,
        kind,
    })
}

// ============================================================================
// Event Tracer (nop + sched events)
// ============================================================================

/// Layout of `sched_switch:` / `sched_wakeup:` event lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFormat;

impl LineFormat for EventFormat {
    fn name(&self) -> &'static str {
        "nop"
    }

    fn accepts(&self, tracer: &str) -> bool {
        tracer == "nop"
    }

    fn guesses_initial_state(&self) -> bool {
        false
    }

    fn line_parser(&self) -> Box<dyn LineParser> {
        Box::new(EventParser::default())
    }
}

fn switch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^prev_comm=.* prev_pid=.* prev_state=(\S+) ==> next_comm=(.*) next_pid=(\d+) next_prio=\d+$",
        )
        .expect("sched_switch pattern is valid")
    })
}

fn wakeup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^comm=(.*) pid=(\d+) prio=\d+ (?:success=\d+ )?target_cpu=\d+$")
            .expect("sched_wakeup pattern is valid")
    })
}

/// Remembers the last switch-out state of every pid, since wakeup events
/// do not say what state the woken task was in.
#[derive(Debug, Default)]
struct EventParser {
    last_state: HashMap<Pid, char>,
}

impl EventParser {
    fn unmatched(event: &str, payload: &str) -> ParseError {
        ParseError::UnmatchedPayload {
            event: event.to_string(),
            payload: payload.to_string(),
        }
    }
}

impl LineParser for EventParser {
    fn parse(&mut self, line: &str) -> Result<Option<SchedEvent>, ParseError> {
        let LinePrefix {
            name: source_name,
            pid: source_pid,
            timestamp,
            mut cursor,
        } = parse_prefix(line)?;

        cursor.skip_spaces();
        let event = cursor.take_until(b':', "event name")?;
        cursor.advance(1);
        let payload = cursor.rest().trim();

        let (kind, source_state, dest_pid, dest_state, dest_name) = match event {
            "sched_switch" => {
                let caps = switch_pattern()
                    .captures(payload)
                    .ok_or_else(|| Self::unmatched(event, payload))?;
                let prev_state = caps[1].chars().next().unwrap_or('S');
                let dest_pid = parse_pid(&caps[3])?;
                self.last_state.insert(source_pid, prev_state);
                // The incoming task is running by definition.
                (EventKind::Switch, prev_state, dest_pid, 'R', task_name(&caps[2]))
            }
            "sched_wakeup" | "sched_wakeup_new" => {
                let caps = wakeup_pattern()
                    .captures(payload)
                    .ok_or_else(|| Self::unmatched(event, payload))?;
                let dest_pid = parse_pid(&caps[2])?;
                let dest_state = self.last_state.get(&dest_pid).copied().unwrap_or('S');
                // The waker keeps running.
                (EventKind::Wakeup, 'R', dest_pid, dest_state, task_name(&caps[1]))
            }
            _ => return Ok(None),
        };

        Ok(Some(SchedEvent {
            source_pid,
            source_state,
            source_name,
            dest_pid,
            dest_state,
            dest_name,
            timestamp,
            kind,
        }))
    }
}
