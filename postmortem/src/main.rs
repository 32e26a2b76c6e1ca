//! # postmortem - Main Entry Point
//!
//! Loads the captured artifacts named on the command line, runs the
//! analysis and writes the JSON report to stdout or `--output`.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use postmortem::analysis::{load_dumps, Analysis, Report};
use postmortem::cli::Args;
use postmortem::domain::DumpError;
use postmortem::metadata::{NoMetadata, ProcessMetadata, StaticMetadata};
use postmortem::sched::AnalysisConfig;
use postmortem::section::{LineSection, Section};
use postmortem::threads::{AidlResolver, BinderStateResolver, NoAidl};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_DATAERR: i32 = 65;
const EXIT_NOINPUT: i32 = 66;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            if io.kind() == io::ErrorKind::NotFound {
                return EXIT_NOINPUT;
            }
        }
        if cause.downcast_ref::<serde_json::Error>().is_some() {
            return EXIT_DATAERR;
        }
        match cause.downcast_ref::<DumpError>() {
            Some(DumpError::Json(_)) => return EXIT_DATAERR,
            Some(DumpError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return EXIT_NOINPUT,
            _ => {}
        }
    }
    EXIT_ERROR
}

/// Usage errors exit through clap with status 2.
fn run() -> Result<()> {
    let args = Args::parse();

    let metadata = load_metadata(&args)?;
    let binder = args
        .binder
        .as_deref()
        .map(|path| -> Result<BinderStateResolver> {
            let section = LineSection::from_file(path)
                .with_context(|| format!("Failed to read binder state {}", path.display()))?;
            Ok(BinderStateResolver::from_section(&section))
        })
        .transpose()?;
    let trace = args
        .trace
        .as_deref()
        .map(|path| {
            LineSection::from_file(path)
                .with_context(|| format!("Failed to read trace {}", path.display()))
        })
        .transpose()?;
    let mut dumps = match args.dumps.as_deref() {
        Some(path) => load_dumps(path)
            .with_context(|| format!("Failed to load dumps {}", path.display()))?,
        None => Vec::new(),
    };

    let metadata: &dyn ProcessMetadata = match &metadata {
        Some(m) => m,
        None => &NoMetadata,
    };
    let resolver: &dyn AidlResolver = match &binder {
        Some(b) => b,
        None => &NoAidl,
    };
    let config = AnalysisConfig {
        min_trace_lines: args.min_lines,
        guess_initial_state: !args.no_guess,
    };

    let report = Analysis::new()
        .with_metadata(metadata)
        .with_resolver(resolver)
        .with_config(config)
        .run(trace.as_ref().map(|t| t as &dyn Section), &mut dumps);

    write_report(&report, &args)?;
    if !args.quiet {
        print_summary(&report);
    }
    Ok(())
}

fn load_metadata(args: &Args) -> Result<Option<StaticMetadata>> {
    if let Some(path) = &args.metadata {
        let file = File::open(path)
            .with_context(|| format!("Failed to open metadata {}", path.display()))?;
        let meta: StaticMetadata = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse metadata {}", path.display()))?;
        info!("Loaded {} processes from {}", meta.len(), path.display());
        return Ok(Some(meta));
    }
    if let Some(path) = &args.ps {
        let section = LineSection::from_file(path)
            .with_context(|| format!("Failed to read ps output {}", path.display()))?;
        let meta = StaticMetadata::from_ps_section(&section);
        info!("Loaded {} processes from {}", meta.len(), path.display());
        return Ok(Some(meta));
    }
    Ok(None)
}

fn write_report(report: &Report, args: &Args) -> Result<()> {
    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create output file {}", path.display())
        })?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    if args.pretty {
        serde_json::to_writer_pretty(&mut out, report)?;
    } else {
        serde_json::to_writer(&mut out, report)?;
    }
    writeln!(out)?;
    out.flush().context("Failed to write report")?;
    Ok(())
}

fn print_summary(report: &Report) {
    if let Some(trace) = &report.trace {
        eprintln!(
            "trace: {} records over {} us, {} processes ({} format)",
            trace.records.len(),
            trace.duration_us,
            trace.processes.len(),
            trace.format
        );
    }
    for dump in &report.dumps {
        eprintln!(
            "{}: {} busy, {} deadlocks",
            dump.name,
            dump.graph.busy.len(),
            dump.deadlocks.len()
        );
    }
    for finding in &report.findings {
        eprintln!("[{}] {}", finding.priority, finding.title);
    }
    for err in &report.errors {
        eprintln!("skipped {err}");
    }
}
