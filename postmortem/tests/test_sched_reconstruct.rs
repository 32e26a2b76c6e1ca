use postmortem::analysis::{analyze_trace, TraceSummary};
use postmortem::domain::{Pid, TraceError};
use postmortem::metadata::{NoMetadata, StaticMetadata};
use postmortem::sched::AnalysisConfig;
use postmortem::section::LineSection;
use postmortem_common::{EventKind, ProcessState};
use std::io::Write;
use std::path::Path;

fn load(name: &str) -> LineSection {
    let path = Path::new("tests/fixtures").join(name);
    LineSection::from_file(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}

fn counts(summary: &TraceSummary) -> Vec<u32> {
    summary.records.iter().map(|r| r.contending).collect()
}

#[test]
fn test_legacy_trace_contending_counts() {
    let model = analyze_trace(
        &load("sched_switch_basic.txt"),
        &NoMetadata,
        AnalysisConfig::default(),
    )
    .unwrap();
    let summary = TraceSummary::from(&model);

    assert_eq!(summary.format, "sched_switch");
    assert_eq!(counts(&summary), vec![1, 2, 1, 0, 1]);
    assert_eq!(summary.duration_us, 2000);
    assert_eq!(summary.skipped_lines, 0);
    assert_eq!(summary.records[1].kind, EventKind::Wakeup);
}

#[test]
fn test_legacy_trace_infers_initial_states() {
    let model = analyze_trace(
        &load("sched_switch_basic.txt"),
        &NoMetadata,
        AnalysisConfig::default(),
    )
    .unwrap();

    let idle = model.process(Pid(0)).unwrap();
    assert_eq!(idle.initial_state, ProcessState::Running);
    assert_eq!(idle.run_time_us, 1000);

    let app = model.process(Pid(5)).unwrap();
    assert_eq!(app.initial_state, ProcessState::Waiting);
    assert_eq!(app.run_time_us, 500);
    assert_eq!(app.current_state, ProcessState::Running);

    // Woken before it ever ran: the default guess stands.
    let worker = model.process(Pid(7)).unwrap();
    assert_eq!(worker.initial_state, ProcessState::Sleeping);
    assert_eq!(worker.wait_time_us, 300);
    assert_eq!(worker.wait_count, 1);
    assert_eq!(worker.run_time_us, 500);
}

#[test]
fn test_legacy_trace_process_order_and_histogram() {
    let model = analyze_trace(
        &load("sched_switch_basic.txt"),
        &NoMetadata,
        AnalysisConfig::default(),
    )
    .unwrap();

    // 5 and 7 both ran for 500us; 7 also waited 300us for the CPU.
    let order: Vec<u32> = model.processes().iter().map(|p| p.pid.0).collect();
    assert_eq!(order, vec![0, 7, 5]);

    let histogram = model.histogram();
    assert_eq!(histogram.durations_us, vec![1000, 700, 300]);
    assert_eq!(histogram.total_us, model.duration_us());
    assert!((histogram.percent(0) - 50.0).abs() < f64::EPSILON);
}

#[test]
fn test_nop_trace_without_guessing() {
    let model = analyze_trace(&load("nop_events.txt"), &NoMetadata, AnalysisConfig::default())
        .unwrap();
    let summary = TraceSummary::from(&model);

    assert_eq!(summary.format, "nop");
    assert_eq!(counts(&summary), vec![0, 1, 0, 1, 1]);
    assert_eq!(summary.skipped_lines, 1);
    assert_eq!(summary.duration_us, 1500);

    let app = model.process(Pid(5)).unwrap();
    assert_eq!(app.initial_state, ProcessState::Sleeping);
    assert_eq!(app.run_time_us, 300);
    assert_eq!(app.wait_time_us, 200);
    assert_eq!(app.wait_count, 2);
    assert_eq!(app.disk_wait_time_us, 1000);
    assert_eq!(app.disk_wait_count, 1);
    assert_eq!(app.avg_wait_us(), 100);
    assert_eq!(app.avg_disk_wait_us(), 1000);
    assert!((app.wait_over_run() - 200.0 / 300.0).abs() < 1e-9);
    assert_eq!(app.name.as_deref(), Some("5-app"));

    let idle = model.process(Pid(0)).unwrap();
    assert_eq!(idle.initial_state, ProcessState::Sleeping);
    assert_eq!(idle.display_name(), "SLEEP");
}

#[test]
fn test_ps_metadata_names_processes() {
    let mut ps = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        ps,
        "USER           PID   TID  PPID     VSZ    RSS WCHAN            ADDR S CMD\n\
         root             1     1     0   73884   4768 0                   0 S init\n\
         root           300   300     1 1234567  80000 0                   0 S zygote\n\
         u0_a42           5     5   300 2345678  90000 0                   0 S com.example.app\n\
         u0_a42           7     7   300 2345678  90000 0                   0 S com.example.sync"
    )
    .unwrap();

    let meta = StaticMetadata::from_ps_section(&LineSection::from_file(ps.path()).unwrap());
    assert_eq!(meta.len(), 4);

    let model = analyze_trace(&load("sched_switch_basic.txt"), &meta, AnalysisConfig::default())
        .unwrap();
    assert_eq!(
        model.process(Pid(5)).unwrap().display_name(),
        "300-zygote\\5-com.example.app"
    );
    assert_eq!(
        model.process(Pid(7)).unwrap().display_name(),
        "300-zygote\\7-com.example.sync"
    );
}

#[test]
fn test_trace_too_short_for_config() {
    let config = AnalysisConfig {
        min_trace_lines: 100,
        ..AnalysisConfig::default()
    };
    let result = analyze_trace(&load("sched_switch_basic.txt"), &NoMetadata, config);
    assert!(matches!(
        result,
        Err(TraceError::InsufficientData { found: 9, required: 100 })
    ));
}
