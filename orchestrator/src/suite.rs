//! Parallel run coordinator: one RUN pass over every scenario group.
//!
//! Groups run one after another; the cases of a group are fanned out over a
//! bounded pool of scoped worker threads that pull the next case index from
//! a shared counter. Workers share nothing but the result lists and the
//! [`Console`].

use std::any::Any;
use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{error, info, instrument};

use crate::core::stats::{DroppedCase, GroupReport, RunReport};
use crate::core::types::{TestCase, TestResult};
use crate::io::agent::Agent;
use crate::io::executor::{Grader, execute_test};
use crate::io::reports::{write_group_report, write_run_report, write_test_report};
use crate::io::scenarios::ScenarioGroup;

const STATUS_NAME_CHARS: usize = 50;

/// Product console output, serialized so concurrent workers never interleave.
pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    /// Write one line. Console failures never stop a run.
    pub fn line(&self, line: impl AsRef<str>) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line.as_ref());
            let _ = out.flush();
        }
    }
}

/// `  Test 3: Search closed issues... PASS (4.2s)`
pub fn status_line(result: &TestResult) -> String {
    let name: String = result.case.name.chars().take(STATUS_NAME_CHARS).collect();
    format!(
        "  Test {}: {}... {} ({:.1}s)",
        result.case.id,
        name,
        result.status.as_str(),
        result.duration_secs()
    )
}

/// Run every case of one group on at most `workers` threads.
///
/// Each finished case gets its report file written by the worker that ran
/// it. A case whose worker panics, or whose report cannot be written, is
/// logged and recorded as dropped instead of appearing in the results.
#[instrument(skip_all, fields(group = %group, cases = cases.len(), workers = workers))]
pub fn run_group<A: Agent + ?Sized>(
    group: &str,
    cases: &[TestCase],
    workers: usize,
    agent: &A,
    grader: &Grader,
    group_dir: &Path,
    console: &Console,
) -> GroupReport {
    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<TestResult>> = Mutex::new(Vec::with_capacity(cases.len()));
    let dropped: Mutex<Vec<DroppedCase>> = Mutex::new(Vec::new());

    thread::scope(|scope| {
        let jobs = workers.min(cases.len()).max(1);
        for _ in 0..jobs {
            scope.spawn(|| {
                loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(case) = cases.get(idx) else {
                        return;
                    };
                    match run_case(group, case, agent, grader, group_dir) {
                        Ok(result) => {
                            console.line(status_line(&result));
                            if let Ok(mut guard) = results.lock() {
                                guard.push(result);
                            }
                        }
                        Err(reason) => {
                            error!(id = case.id, %reason, "dropping test case");
                            if let Ok(mut guard) = dropped.lock() {
                                guard.push(DroppedCase {
                                    id: case.id,
                                    name: case.name.clone(),
                                    reason,
                                });
                            }
                        }
                    }
                }
            });
        }
    });

    let results = results.into_inner().unwrap_or_default();
    let mut dropped = dropped.into_inner().unwrap_or_default();
    dropped.sort_by_key(|case| case.id);
    GroupReport::new(group, results, dropped)
}

fn run_case<A: Agent + ?Sized>(
    group: &str,
    case: &TestCase,
    agent: &A,
    grader: &Grader,
    group_dir: &Path,
) -> Result<TestResult, String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        execute_test(group, case, agent, grader)
    }))
    .map_err(|payload| format!("worker panicked: {}", panic_message(payload.as_ref())))?;
    write_test_report(group_dir, &result).map_err(|err| format!("{err:#}"))?;
    Ok(result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute one full RUN pass and write its report artifacts into `run_dir`.
///
/// Errors only when report directories or summaries cannot be written.
pub fn run_suite<A: Agent + ?Sized>(
    groups: &[ScenarioGroup],
    run_dir: &Path,
    workers: usize,
    agent: &A,
    grader: &Grader,
    console: &Console,
) -> Result<RunReport> {
    let started_at = Local::now();
    let mut reports = Vec::with_capacity(groups.len());

    for group in groups {
        console.line(format!("\nProcessing {}...", group.name));
        console.line(format!("  Found {} tests", group.cases.len()));

        let group_dir = run_dir.join(&group.name);
        fs::create_dir_all(&group_dir)
            .with_context(|| format!("create group dir {}", group_dir.display()))?;

        let report = run_group(
            &group.name,
            &group.cases,
            workers,
            agent,
            grader,
            &group_dir,
            console,
        );
        write_group_report(&group_dir, &report)?;

        let summary = report.summary();
        info!(group = %group.name, passed = summary.passed, total = summary.total, dropped = report.dropped.len(), "group complete");
        console.line(format!(
            "  Group complete: {}/{} passed",
            summary.passed, summary.total
        ));
        reports.push(report);
    }

    let report = RunReport {
        started_at,
        ended_at: Local::now(),
        groups: reports,
    };
    write_run_report(run_dir, &report)?;
    Ok(report)
}
