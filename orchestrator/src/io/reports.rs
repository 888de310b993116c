//! Run report artifacts.
//!
//! Layout under the reports root:
//!
//! ```text
//! <reports_dir>/<YYYY-MM-DD>_<N>/
//!   REPORT.md              run summary
//!   results.json           machine-readable run report
//!   <group>/REPORT.md      group summary
//!   <group>/<id>.md        one file per test
//! ```
//!
//! Collaborator notes are written into the same run directory by the
//! collaborators themselves.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::core::stats::{GroupReport, RunReport};
use crate::core::types::{TestResult, TestStatus};

pub const REPORT_FILE: &str = "REPORT.md";
pub const RESULTS_FILE: &str = "results.json";

/// Raw output shown in markdown reports is cut to this many characters.
const OUTPUT_PREVIEW_CHARS: usize = 2000;

static RUN_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})_(\d+)$").expect("run dir regex should be valid")
});

/// List run directories under `root`, oldest first (date, then sequence).
///
/// A missing root yields an empty list; non-matching entries are ignored.
pub fn scan_run_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", root.display()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(caps) = RUN_DIR_RE.captures(name)
            && let Ok(sequence) = caps[2].parse::<u64>()
        {
            found.push((caps[1].to_string(), sequence, entry.path()));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

/// Create `<root>/<date>_<N>` for the first unused N starting at 1.
pub fn allocate_run_dir(root: &Path, date: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(root).with_context(|| format!("create reports root {}", root.display()))?;
    let date = date.format("%Y-%m-%d");
    let mut sequence = 1u64;
    loop {
        let dir = root.join(format!("{date}_{sequence}"));
        match fs::create_dir(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "allocated run directory");
                return Ok(dir);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => sequence += 1,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", dir.display()));
            }
        }
    }
}

/// Path of the per-test report inside a group directory.
pub fn test_report_path(group_dir: &Path, id: u32) -> PathBuf {
    group_dir.join(format!("{id}.md"))
}

pub fn write_test_report(group_dir: &Path, result: &TestResult) -> Result<()> {
    let path = test_report_path(group_dir, result.case.id);
    fs::write(&path, render_test_report(result))
        .with_context(|| format!("write test report {}", path.display()))
}

pub fn write_group_report(group_dir: &Path, group: &GroupReport) -> Result<()> {
    let path = group_dir.join(REPORT_FILE);
    fs::write(&path, render_group_report(group))
        .with_context(|| format!("write group report {}", path.display()))
}

/// Write the run summary and `results.json`.
pub fn write_run_report(run_dir: &Path, report: &RunReport) -> Result<()> {
    let path = run_dir.join(REPORT_FILE);
    fs::write(&path, render_run_report(run_dir, report))
        .with_context(|| format!("write run report {}", path.display()))?;

    let path = run_dir.join(RESULTS_FILE);
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))
}

fn output_preview(output: &str) -> String {
    let mut chars = output.chars();
    let preview: String = chars.by_ref().take(OUTPUT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}

fn criteria_list(out: &mut String, criteria: &[String]) {
    for criterion in criteria {
        let _ = writeln!(out, "- {criterion}");
    }
}

fn status_icon(status: TestStatus) -> &'static str {
    if status.counts_as_passed() { "✓" } else { "✗" }
}

pub fn render_test_report(result: &TestResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Test {}: {}\n", result.case.id, result.case.name);
    let _ = writeln!(out, "**Status:** {}\n", result.status.as_str());
    let _ = writeln!(out, "**Duration:** {:.2}s\n", result.duration_secs());
    let _ = writeln!(out, "**User Request:** \"{}\"\n", result.case.user_request);
    let _ = writeln!(
        out,
        "**Command Generated:**\n```bash\n{}\n```\n",
        result.command_display()
    );
    out.push_str("**Expected Criteria:**\n");
    criteria_list(&mut out, &result.case.criteria);
    out.push('\n');
    if result.status == TestStatus::Fail {
        let _ = writeln!(out, "**Failure Reason:**\n{}\n", result.failure_reason);
    }
    let _ = writeln!(
        out,
        "**Full Output:**\n```\n{}\n```",
        output_preview(&result.raw_output)
    );
    out
}

pub fn render_group_report(group: &GroupReport) -> String {
    let summary = group.summary();
    let mut out = String::new();
    let _ = writeln!(out, "# Test Group Report: {}\n", group.name);
    if let Some(last) = group.results.iter().map(|r| r.ended_at).max() {
        let _ = writeln!(out, "**Date:** {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    let _ = writeln!(out, "**Group Name:** {}\n", group.name);

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "- **Total Tests:** {}", summary.total);
    let _ = writeln!(
        out,
        "- **Passed:** {} ({:.1}%)",
        summary.passed,
        summary.pass_rate()
    );
    let _ = writeln!(out, "- **Failed:** {}", summary.failed);
    if summary.skipped > 0 {
        let _ = writeln!(out, "- **Skipped:** {}", summary.skipped);
    }
    duration_lines(&mut out, &summary);
    if !group.dropped.is_empty() {
        let _ = writeln!(out, "- **Dropped:** {}", group.dropped.len());
    }
    out.push('\n');

    out.push_str("## Test Results\n\n");
    for result in &group.results {
        let id = result.case.id;
        let _ = writeln!(out, "### Test {id}: {}", result.case.name);
        let _ = writeln!(
            out,
            "- **Status:** {} {}",
            status_icon(result.status),
            result.status.as_str()
        );
        let _ = writeln!(out, "- **Duration:** {:.1}s", result.duration_secs());
        let _ = writeln!(out, "- **User Request:** \"{}\"", result.case.user_request);
        let _ = writeln!(out, "- **Command Generated:** `{}`", result.command_display());
        if result.status == TestStatus::Fail {
            let _ = writeln!(out, "- **Issue:** {}", result.failure_reason);
        }
        let _ = writeln!(out, "- **Report:** [./{id}.md](./{id}.md)\n");
    }

    if !group.dropped.is_empty() {
        out.push_str("## Dropped Tests\n\n");
        for dropped in &group.dropped {
            let _ = writeln!(
                out,
                "- Test {}: {} ({})",
                dropped.id, dropped.name, dropped.reason
            );
        }
        out.push('\n');
    }
    out
}

fn duration_lines(out: &mut String, summary: &crate::core::stats::Summary) {
    let _ = writeln!(
        out,
        "- **Total Duration:** {:.1}s ({:.1}m)",
        summary.total_duration_secs,
        summary.total_duration_secs / 60.0
    );
    let _ = writeln!(
        out,
        "- **Average Duration:** {:.1}s per test",
        summary.avg_duration_secs
    );
    let _ = writeln!(
        out,
        "- **Duration Range:** {:.1}s - {:.1}s",
        summary.min_duration_secs, summary.max_duration_secs
    );
}

pub fn render_run_report(run_dir: &Path, report: &RunReport) -> String {
    let summary = report.summary();
    let mut out = String::new();
    out.push_str("# Test Suite Report\n\n");
    let _ = writeln!(
        out,
        "**Date:** {}",
        report.ended_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(sequence) = run_dir
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit('_').next())
    {
        let _ = writeln!(out, "**Report:** {sequence}");
    }
    out.push('\n');

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "- **Total Test Groups:** {}", report.groups.len());
    let _ = writeln!(out, "- **Total Tests:** {}", summary.total);
    let _ = writeln!(
        out,
        "- **Passed:** {} ({:.1}%)",
        summary.passed,
        summary.pass_rate()
    );
    let _ = writeln!(
        out,
        "- **Failed:** {} ({:.1}%)",
        summary.failed,
        summary.fail_rate()
    );
    duration_lines(&mut out, &summary);
    out.push('\n');

    let mut groups: Vec<&GroupReport> = report.groups.iter().collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    out.push_str("## Results by Group\n\n");
    for group in &groups {
        let group_summary = group.summary();
        let name = &group.name;
        let _ = writeln!(out, "### {name}");
        let _ = writeln!(out, "- **Tests:** {}", group_summary.total);
        let _ = writeln!(out, "- **Passed:** {}", group_summary.passed);
        let _ = writeln!(out, "- **Failed:** {}", group_summary.failed);
        let _ = writeln!(out, "- **Pass Rate:** {:.1}%", group_summary.pass_rate());
        let _ = writeln!(out, "- **Report:** [./{name}/REPORT.md](./{name}/REPORT.md)\n");
    }

    out.push_str("## Failed Tests Summary\n\n");
    let mut any_failed = false;
    for group in &groups {
        let failed: Vec<&TestResult> = group
            .results
            .iter()
            .filter(|result| result.status == TestStatus::Fail)
            .collect();
        if failed.is_empty() {
            continue;
        }
        any_failed = true;
        let name = &group.name;
        let _ = writeln!(out, "### {name}\n");
        for result in failed {
            let id = result.case.id;
            let _ = writeln!(out, "**Test {id}: {}**\n", result.case.name);
            let _ = writeln!(out, "**Status:** {}\n", result.status.as_str());
            let _ = writeln!(out, "**Duration:** {:.1}s\n", result.duration_secs());
            let _ = writeln!(out, "**User Request:** \"{}\"\n", result.case.user_request);
            let _ = writeln!(
                out,
                "**Command Generated:**\n```bash\n{}\n```\n",
                result.command_display()
            );
            out.push_str("**Expected Criteria:**\n");
            criteria_list(&mut out, &result.case.criteria);
            out.push('\n');
            let _ = writeln!(out, "**Failure Reason:**\n{}\n", result.failure_reason);
            let _ = writeln!(
                out,
                "**Full Output:**\n```\n{}\n```\n",
                output_preview(&result.raw_output)
            );
            let _ = writeln!(
                out,
                "**Full Report:** [./{name}/{id}.md](./{name}/{id}.md)\n"
            );
            out.push_str("---\n\n");
        }
    }
    if !any_failed {
        out.push_str("No test failures - all tests passed!\n\n");
    }

    out.push_str("## Test Execution Details\n\n");
    let _ = writeln!(out, "- **Scenario Files Processed:** {}", report.groups.len());
    let _ = writeln!(out, "- **Tests Executed:** {}", summary.total);
    let dropped = report.dropped_count();
    if dropped > 0 {
        let _ = writeln!(out, "- **Tests Dropped:** {dropped}");
    }
    let _ = writeln!(out, "- **Run Duration:** {:.1}s", report.duration_secs());
    out
}
