//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "postmortem",
    about = "Analyze captured scheduler traces and thread dumps for contention and deadlocks",
    after_help = "\
EXAMPLES:
    postmortem --trace ftrace.txt --ps ps.txt            Scheduler trace with ps names
    postmortem --dumps dumps.json --binder state.txt     Deadlocks across processes
    postmortem --trace ftrace.txt --dumps dumps.json -o report.json --pretty"
)]
pub struct Args {
    /// Scheduler trace captured from the kernel function tracer
    #[arg(long, value_name = "FILE", required_unless_present = "dumps")]
    pub trace: Option<PathBuf>,

    /// Thread dumps as a JSON array of snapshots
    #[arg(long, value_name = "FILE")]
    pub dumps: Option<PathBuf>,

    /// Process names and parents as JSON
    #[arg(long, value_name = "FILE", conflicts_with = "ps")]
    pub metadata: Option<PathBuf>,

    /// Process names and parents from `ps -A -T` output
    #[arg(long, value_name = "FILE")]
    pub ps: Option<PathBuf>,

    /// Kernel binder state, used to follow AIDL calls across processes
    #[arg(long, value_name = "FILE", requires = "dumps")]
    pub binder: Option<PathBuf>,

    /// Do not infer the state processes were in before the trace started
    #[arg(long)]
    pub no_guess: bool,

    /// Minimum non-empty lines for a trace to be analyzed
    #[arg(long, default_value = "5", value_name = "N")]
    pub min_lines: usize,

    /// Write the report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,

    /// Suppress the summary printed to stderr
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_or_dumps_required() {
        assert!(Args::try_parse_from(["postmortem"]).is_err());
        assert!(Args::try_parse_from(["postmortem", "--dumps", "d.json"]).is_ok());
    }

    #[test]
    fn test_metadata_sources_conflict() {
        let res = Args::try_parse_from([
            "postmortem", "--trace", "t.txt", "--metadata", "m.json", "--ps", "ps.txt",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["postmortem", "--trace", "t.txt"]).unwrap();
        assert_eq!(args.min_lines, 5);
        assert!(!args.no_guess);
        assert!(args.binder.is_none());
    }
}
