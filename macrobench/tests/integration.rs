//! Integration tests for Macrobench
//!
//! These tests fork real workers: the `macrobench` binary built for this
//! test run serves as the worker executable.

use macrobench::{
    BenchConfiguration, BenchError, ExecutionError, Harness, HostConfig, Orchestrator,
    ValidationError, Value, snapshot,
};
use std::path::Path;
use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_macrobench");

fn harness(temp: &Path) -> Harness {
    let orchestrator = Orchestrator::new(HostConfig::default())
        .unwrap()
        .with_worker_binary(BIN)
        .with_temp_dir(temp);
    Harness::new(orchestrator)
}

fn options(json: serde_json::Value) -> Value {
    macrobench_cli::json_to_value(&json)
}

fn quick() -> Value {
    options(serde_json::json!({
        "forks": 1,
        "warmupForks": 0,
        "measurementIterations": 2,
        "warmupIterations": 0,
        "measurementTime": "1s"
    }))
}

fn leftover_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// One fork, two measurement iterations, no hooks
#[test]
fn test_single_fork_single_record() {
    let temp = tempfile::tempdir().unwrap();
    let harness = harness(temp.path());
    let code = snapshot::decode_macro("<% 1 1 + %>", harness.orchestrator().registry()).unwrap();

    let results = harness.run_macro(code.clone(), &quick()).unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.forks, 1);
    assert_eq!(result.threads, 1);
    assert_eq!(result.bench_configuration.measured(), &code);
    assert_eq!(result.primary_metric.raw_data.len(), 1);
    assert_eq!(result.primary_metric.raw_data[0].len(), 2);
    assert!(result.primary_metric.score > 0.0);
    assert_eq!(result.primary_metric.score_unit, "ops/s");

    let json = macrobench::generate_json_report(&results).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value[0]["benchConfiguration"]["macro"], "<% 1 1 + %>");
    assert_eq!(value[0]["mode"], "thrpt");

    assert_eq!(leftover_files(temp.path()), 0);
}

/// The failure surfaces with its root cause; nothing is left behind
#[test]
fn test_faulting_macro_fails_run() {
    let temp = tempfile::tempdir().unwrap();
    let harness = harness(temp.path());
    let code =
        snapshot::decode_macro("<% 'kaput' FAIL %>", harness.orchestrator().registry()).unwrap();

    let err = harness.run_macro(code, &quick()).unwrap_err();

    match err {
        BenchError::Execution(ExecutionError::Measurement {
            context,
            root,
            tree,
        }) => {
            assert_eq!(context, macrobench_cli::RUN_FAILURE);
            assert_eq!(root, "INVOCATION failed: kaput");
            assert_eq!(tree.root().message, "fork 0 failed");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(leftover_files(temp.path()), 0);
}

/// Hooks travel to the worker along with the measured macro
#[test]
fn test_hook_map_runs_in_worker() {
    let temp = tempfile::tempdir().unwrap();
    let harness = harness(temp.path());
    let hooks = snapshot::decode_value(
        "{ 'macro' <% DUP + %> 'preinvocation' <% 21 %> 'posttrial' <% CLEAR %> }",
        harness.orchestrator().registry(),
    )
    .unwrap();
    let opts = options(serde_json::json!({
        "forks": 1,
        "warmupIterations": 0,
        "measurementIterations": 1,
        "mode": "avgt",
        "measurementTime": "100ms",
        "timeUnit": "NANOSECONDS"
    }));

    let results = harness.run_hooks(&hooks, &opts).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].primary_metric.score_unit, "ns/op");
    assert_eq!(
        results[0].bench_configuration,
        BenchConfiguration::from_value(&hooks).unwrap()
    );
    assert_eq!(leftover_files(temp.path()), 0);
}

/// Validation happens before any file is written or process launched
#[test]
fn test_threads_rejected_before_launch() {
    let temp = tempfile::tempdir().unwrap();
    let harness = harness(temp.path());
    let code = snapshot::decode_macro("<% 1 %>", harness.orchestrator().registry()).unwrap();
    let err = harness
        .run_macro(code, &options(serde_json::json!({"threads": 1})))
        .unwrap_err();
    assert!(matches!(
        err,
        BenchError::Validation(ValidationError::UnsupportedOption { .. })
    ));
    assert_eq!(leftover_files(temp.path()), 0);
}

#[test]
fn test_cli_check_shows_heap_flags() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("bench.mc2");
    std::fs::write(&snap, "<% 1 1 + %>").unwrap();

    let output = Command::new(BIN)
        .current_dir(dir.path())
        .arg("check")
        .arg(&snap)
        .args(["--options", r#"{"mem":"256m"}"#])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--heap-min=256m"), "{stdout}");
    assert!(stdout.contains("--heap-max=256m"), "{stdout}");
}

#[test]
fn test_cli_rejects_bad_profiler_entry() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("bench.mc2");
    std::fs::write(&snap, "<% 1 1 + %>").unwrap();

    let output = Command::new(BIN)
        .current_dir(dir.path())
        .arg("check")
        .arg(&snap)
        .args(["--options", r#"{"profilers":["gc",123]}"#])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("profilers"), "{stderr}");
}

#[test]
fn test_cli_run_writes_json() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let snap = dir.path().join("bench.mc2");
    let out = dir.path().join("results.json");
    std::fs::write(&snap, "<% 1 1 + %>").unwrap();

    let status = Command::new(BIN)
        .current_dir(dir.path())
        .env("TMPDIR", scratch.path())
        .arg("run")
        .arg(&snap)
        .args([
            "--options",
            r#"{"forks":1,"warmupIterations":0,"measurementIterations":1,"mode":"ss"}"#,
        ])
        .arg("--output")
        .arg(&out)
        .status()
        .unwrap();

    assert!(status.success());
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 1);
    assert_eq!(value[0]["mode"], "ss");
    assert_eq!(value[0]["benchConfiguration"]["macro"], "<% 1 1 + %>");
    assert_eq!(leftover_files(scratch.path()), 0);
}
