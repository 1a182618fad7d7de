use assert_cmd::Command;
use regex::Regex;
use std::fs;
use tempfile::TempDir;

const PROJECT: &str = "tests/fixtures/sample";
const MODULE: &str = "bin/Calculator.json";

fn normalize_output(text: &str) -> String {
    // Redact durations like `261.502302ms`, `8s`, `0.3s`.
    let re_dur = Regex::new(r"\b\d+(\.\d+)?(ns|us|µs|ms|s)\b").unwrap();
    let out = re_dur.replace_all(text, "<DUR>");

    let re_json_dur_ms = Regex::new(r#""duration_ms"\s*:\s*\d+"#).unwrap();
    let out = re_json_dur_ms.replace_all(&out, r#""duration_ms": 0"#);

    let re_rate = Regex::new(r"\d+\.\d+ mutations/s").unwrap();
    let out = re_rate.replace_all(&out, "<RATE> mutations/s");

    let re_tmp_unix = Regex::new(r"/tmp/[^\s]+").unwrap();
    let out = re_tmp_unix.replace_all(&out, "<TMP>");

    out.to_string()
}

struct Run {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

fn il_mutant(args: &[&str]) -> Run {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("il-mutant"));
    cmd.args(args)
        .env("NO_COLOR", "1")
        .env("RUST_BACKTRACE", "0")
        .env_remove("IL_MUTANT_LOG");

    let output = cmd.output().expect("command should run");
    Run {
        code: output.status.code(),
        stdout: normalize_output(&String::from_utf8_lossy(&output.stdout)),
        stderr: normalize_output(&String::from_utf8_lossy(&output.stderr)),
    }
}

fn json(run: &Run) -> serde_json::Value {
    serde_json::from_str(&run.stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({e}):\n{}", run.stdout))
}

#[test]
fn help_lists_the_public_commands() {
    let run = il_mutant(&["--help"]);
    assert_eq!(run.code, Some(0));
    assert!(run.stdout.contains("scan"));
    assert!(run.stdout.contains("run"));
    assert!(!run.stdout.contains("host"), "the host protocol command stays hidden");
}

#[test]
fn scan_lists_mutations_per_analyzer() {
    let run = il_mutant(&["scan", "--project", PROJECT, "--module", MODULE]);
    assert_eq!(run.code, Some(0), "{}", run.stderr);
    assert!(run.stdout.starts_with("il-mutant: scan\n"));
    assert!(run.stdout.contains("Arithmetic Analyzer"));
    assert!(run.stdout.contains("#1 Calculator.Operations::Add:8 [simple] Replace add (+) with sub (-)"));
}

#[test]
fn scan_json_describes_each_mutation() {
    let run = il_mutant(&["scan", "--project", PROJECT, "--module", MODULE, "--json"]);
    assert_eq!(run.code, Some(0), "{}", run.stderr);
    let entries = json(&run);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 9);
    assert_eq!(
        entries[0],
        serde_json::json!({
            "id": 1,
            "assembly": "Calculator",
            "member": "Calculator.Operations::Add",
            "analyzer": "Arithmetic Analyzer",
            "level": "simple",
            "description": "Replace add (+) with sub (-)",
            "line": 8,
            "original": "add",
            "mutated": "sub"
        })
    );
}

#[test]
fn scan_without_module_is_a_usage_error() {
    let run = il_mutant(&["scan", "--project", PROJECT]);
    assert_eq!(run.code, Some(2));
    assert!(run.stderr.contains("--module"));
}

#[test]
fn run_with_in_process_suite() {
    let out = TempDir::new().unwrap();
    let out_dir = out.path().to_str().unwrap();
    let run = il_mutant(&[
        "run", "--project", PROJECT, "--module", MODULE, "--suite", "suite.json", "-j", "2", "-o", out_dir,
    ]);
    assert_eq!(run.code, Some(0), "{}", run.stderr);
    assert!(run.stdout.contains("mutations killed:      6"));
    assert!(run.stdout.contains("mutation score:        66.67%"));
    assert!(run.stdout.contains("--- surviving mutations (1 of 9) ---"));

    let log = fs::read_to_string(out.path().join("log")).unwrap();
    insta::assert_snapshot!(log.trim_end(), @r"
    tool: il-mutant
    version: 0.1.0
    project_root: tests/fixtures/sample
    level: simple
    discovered: 9
    summary: killed=6 survived=1 timeout=0 no_coverage=2
    not_run: dropped=0 excluded=0 failed_runs=0
    score: 66.67
    ");

    let survived = fs::read_to_string(out.path().join("survived.txt")).unwrap();
    assert_eq!(survived.lines().count(), 1);
    assert!(survived.contains("Calculator.Operations::BothSet"));
}

#[cfg(unix)]
#[test]
fn run_with_external_host_process() {
    let host = assert_cmd::cargo::cargo_bin!("il-mutant");
    let host = host.to_str().unwrap();
    let run = il_mutant(&[
        "run", "--project", PROJECT, "--module", MODULE, "--host", host, "--json", "--", "host", "--suite",
        "suite.json",
    ]);
    assert_eq!(run.code, Some(0), "{}", run.stderr);
    let report = json(&run);
    assert_eq!(report["tool"], "il-mutant");
    assert_eq!(report["summary"]["killed"], 6);
    assert_eq!(report["summary"]["survived"], 1);
    assert_eq!(report["summary"]["no_coverage"], 2);
}

#[test]
fn fail_on_survivors_exits_with_two() {
    let run = il_mutant(&[
        "run",
        "--project",
        PROJECT,
        "--module",
        MODULE,
        "--suite",
        "suite.json",
        "--fail-on-survivors",
    ]);
    assert_eq!(run.code, Some(2));
    assert!(run.stderr.contains("1 mutation(s) survived"));
}

#[test]
fn run_without_host_fails_as_json() {
    let run = il_mutant(&["run", "--project", PROJECT, "--module", MODULE, "--json"]);
    assert_eq!(run.code, Some(1));
    let report = json(&run);
    assert_eq!(report["tool"], "il-mutant");
    assert!(report["error"].as_str().unwrap().contains("no test host configured"));
}
