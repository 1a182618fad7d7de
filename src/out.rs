use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::report::{MutationStatus, Report, format_mutation_short};

/// Write every report file into `out_dir`, creating it if needed.
pub fn write_all(out_dir: &Path, report: &Report) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("failed to create output dir {:?}", out_dir))?;
    write_report_json(out_dir, report)?;
    write_status_txts(out_dir, report)?;
    write_log(out_dir, report)?;
    Ok(())
}

/// Write `report.json` with the full report.
pub fn write_report_json(out_dir: &Path, report: &Report) -> Result<()> {
    write_pretty_json(&out_dir.join("report.json"), report)
}

/// Write one list per status:
/// - killed.txt
/// - survived.txt
/// - timeout.txt
/// - no_coverage.txt
pub fn write_status_txts(out_dir: &Path, report: &Report) -> Result<()> {
    for status in MutationStatus::ALL {
        let path = out_dir.join(format!("{}.txt", status.label()));

        // The file is created even when the list is empty.
        let mut out = String::new();
        for m in report.with_status(status) {
            out.push_str(&format_mutation_short(m));
            out.push('\n');
        }
        fs::write(&path, out).with_context(|| format!("failed to write {:?}", path))?;
    }
    Ok(())
}

/// Write a stable `log` file (no timestamps or durations) with the summary.
pub fn write_log(out_dir: &Path, report: &Report) -> Result<()> {
    let path = out_dir.join("log");
    let s = &report.summary;

    let lines = [
        format!("tool: {}", report.tool),
        format!("version: {}", report.version),
        format!("project_root: {}", report.project_root.display()),
        format!("level: {}", report.level),
        format!("discovered: {}", report.discovered),
        format!(
            "summary: killed={} survived={} timeout={} no_coverage={}",
            s.killed, s.survived, s.timeout, s.no_coverage
        ),
        format!(
            "not_run: dropped={} excluded={} failed_runs={}",
            s.dropped, s.excluded, s.failed_runs
        ),
        format!("score: {:.2}", report.score),
    ];

    let content = lines.join("\n") + "\n";
    fs::write(&path, content).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

// `?Sized` allows passing unsized values such as slices.
fn write_pretty_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, json).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
