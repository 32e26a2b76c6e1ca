//! Time spent at each contending count.

use super::reconstruct::TraceRecord;
use serde::Serialize;

/// Counts at or above this land in the last bucket.
pub const MAX_BUCKETS: usize = 16;

/// `durations_us[n]` is the time during which `n` processes contended for a
/// CPU. Only buckets up to the highest count seen are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelHistogram {
    pub durations_us: Vec<u64>,
    pub total_us: u64,
}

impl ParallelHistogram {
    /// Build from a record sequence. The interval after the last record has
    /// no end and is not counted.
    #[must_use]
    pub fn from_records(records: &[TraceRecord]) -> Self {
        let mut durations = [0u64; MAX_BUCKETS];
        let mut highest = 0;

        if let Some(first) = records.first() {
            let mut count = 0usize;
            let mut since = first.time;
            for record in records {
                let now = usize::try_from(record.contending).unwrap_or(usize::MAX);
                if now != count {
                    let bucket = count.min(MAX_BUCKETS - 1);
                    durations[bucket] += record.time.saturating_since(since);
                    highest = highest.max(bucket);
                    since = record.time;
                    count = now;
                }
            }
            if let Some(last) = records.last() {
                let bucket = count.min(MAX_BUCKETS - 1);
                durations[bucket] += last.time.saturating_since(since);
                highest = highest.max(bucket);
            }
        }

        let durations_us = durations[..=highest].to_vec();
        let total_us = durations_us.iter().sum();
        Self {
            durations_us,
            total_us,
        }
    }

    /// Share of the trace spent at `count`, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self, count: usize) -> f64 {
        if self.total_us == 0 {
            return 0.0;
        }
        let d = self.durations_us.get(count).copied().unwrap_or(0);
        d as f64 * 100.0 / self.total_us as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Pid, Timestamp};
    use postmortem_common::EventKind;

    fn record(time: u64, contending: u32) -> TraceRecord {
        TraceRecord {
            time: Timestamp(time),
            prev_pid: Pid(0),
            next_pid: Pid(1),
            prev_state: 'R',
            next_state: 'R',
            kind: EventKind::Switch,
            contending,
        }
    }

    #[test]
    fn test_durations_per_count() {
        let records = [record(100, 1), record(150, 2), record(170, 2), record(200, 0)];
        let hist = ParallelHistogram::from_records(&records);
        assert_eq!(hist.durations_us, vec![0, 50, 50]);
        assert_eq!(hist.total_us, 100);
        assert!((hist.percent(1) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_high_counts_share_last_bucket() {
        let records = [record(0, 20), record(10, 30), record(25, 0)];
        let hist = ParallelHistogram::from_records(&records);
        assert_eq!(hist.durations_us.len(), MAX_BUCKETS);
        assert_eq!(hist.durations_us[MAX_BUCKETS - 1], 25);
    }

    #[test]
    fn test_empty() {
        let hist = ParallelHistogram::from_records(&[]);
        assert_eq!(hist.durations_us, vec![0]);
        assert!(hist.percent(3).abs() < f64::EPSILON);
    }
}
