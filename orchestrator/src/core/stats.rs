//! Run and group aggregates.
//!
//! Reports only hold results; every count and duration figure is derived on
//! demand so there is no second source of truth to drift.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::types::{TestResult, TestStatus};

/// A test case that produced no result because its worker faulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedCase {
    pub id: u32,
    pub name: String,
    pub reason: String,
}

/// Results of one scenario group, sorted by ascending test id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    pub results: Vec<TestResult>,
    #[serde(default)]
    pub dropped: Vec<DroppedCase>,
}

/// Results of one full pass over every scenario group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub groups: Vec<GroupReport>,
}

/// Derived figures over a set of results.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    /// PASS plus SKIPPED.
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_secs: f64,
    pub avg_duration_secs: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
}

impl Summary {
    pub fn of<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
        let mut summary = Summary::default();
        let mut min = f64::INFINITY;
        let mut max = 0.0_f64;
        for result in results {
            let duration = result.duration_secs();
            summary.total += 1;
            if result.status.counts_as_passed() {
                summary.passed += 1;
            }
            match result.status {
                TestStatus::Fail => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Pass | TestStatus::Pending => {}
            }
            summary.total_duration_secs += duration;
            min = min.min(duration);
            max = max.max(duration);
        }
        if summary.total > 0 {
            summary.avg_duration_secs = summary.total_duration_secs / summary.total as f64;
            summary.min_duration_secs = min;
            summary.max_duration_secs = max;
        }
        summary
    }

    /// Percentage of passed results, `0.0` for an empty set.
    pub fn pass_rate(&self) -> f64 {
        percent(self.passed, self.total)
    }

    pub fn fail_rate(&self) -> f64 {
        percent(self.failed, self.total)
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl GroupReport {
    /// Build a group report, sorting results by test id.
    pub fn new(
        name: impl Into<String>,
        mut results: Vec<TestResult>,
        dropped: Vec<DroppedCase>,
    ) -> Self {
        results.sort_by_key(|result| result.case.id);
        Self {
            name: name.into(),
            results,
            dropped,
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.results)
    }
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        Summary::of(self.results())
    }

    pub fn results(&self) -> impl Iterator<Item = &TestResult> {
        self.groups.iter().flat_map(|group| group.results.iter())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.results()
            .filter(|result| result.status == TestStatus::Fail)
    }

    pub fn dropped_count(&self) -> usize {
        self.groups.iter().map(|group| group.dropped.len()).sum()
    }

    /// No failures and no dropped cases.
    pub fn fully_passed(&self) -> bool {
        self.summary().all_passed() && self.dropped_count() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TestCase, Verdict};
    use chrono::Duration;

    fn result(id: u32, verdict: Verdict, secs: i64) -> TestResult {
        let case = TestCase {
            id,
            name: format!("case {id}"),
            description: String::new(),
            user_request: "req".to_string(),
            criteria: Vec::new(),
            platform: "All".to_string(),
        };
        let started = Local::now();
        let mut pending = TestResult::pending("search-issues", &case, started);
        pending.ended_at = started + Duration::seconds(secs);
        pending.finish(verdict)
    }

    #[test]
    fn skipped_counts_as_passed() {
        let group = GroupReport::new(
            "search-issues",
            vec![
                result(1, Verdict::pass("ok"), 2),
                result(2, Verdict::skipped("SKIPPED: PowerShell-specific test"), 0),
                result(3, Verdict::fail("Missing flag: --state"), 4),
            ],
            Vec::new(),
        );
        let summary = group.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!((summary.pass_rate() - 200.0 / 3.0).abs() < 1e-9);
        assert!(!summary.all_passed());
    }

    #[test]
    fn durations_are_derived() {
        let summary = Summary::of(&[
            result(1, Verdict::pass("ok"), 2),
            result(2, Verdict::pass("ok"), 6),
        ]);
        assert_eq!(summary.total_duration_secs, 8.0);
        assert_eq!(summary.avg_duration_secs, 4.0);
        assert_eq!(summary.min_duration_secs, 2.0);
        assert_eq!(summary.max_duration_secs, 6.0);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = Summary::of(&Vec::<TestResult>::new());
        assert_eq!(summary, Summary::default());
        assert_eq!(summary.pass_rate(), 0.0);
        assert!(summary.all_passed());
    }

    #[test]
    fn group_results_are_sorted_by_id() {
        let group = GroupReport::new(
            "g",
            vec![
                result(3, Verdict::pass("ok"), 1),
                result(1, Verdict::pass("ok"), 1),
                result(2, Verdict::pass("ok"), 1),
            ],
            Vec::new(),
        );
        let ids: Vec<u32> = group.results.iter().map(|r| r.case.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn run_report_spans_groups() {
        let now = Local::now();
        let report = RunReport {
            started_at: now,
            ended_at: now + Duration::milliseconds(1500),
            groups: vec![
                GroupReport::new("a", vec![result(1, Verdict::fail("x"), 1)], Vec::new()),
                GroupReport::new(
                    "b",
                    vec![result(1, Verdict::pass("ok"), 1)],
                    vec![DroppedCase {
                        id: 2,
                        name: "case 2".to_string(),
                        reason: "worker panicked".to_string(),
                    }],
                ),
            ],
        };
        assert_eq!(report.summary().total, 2);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.dropped_count(), 1);
        assert_eq!(report.duration_secs(), 1.5);
        assert!(!report.fully_passed());
    }

    #[test]
    fn dropped_case_prevents_full_pass() {
        let now = Local::now();
        let dropped = DroppedCase {
            id: 2,
            name: "case 2".to_string(),
            reason: "worker panicked".to_string(),
        };
        let mut report = RunReport {
            started_at: now,
            ended_at: now,
            groups: vec![GroupReport::new(
                "b",
                vec![result(1, Verdict::pass("ok"), 1)],
                vec![dropped],
            )],
        };
        assert!(report.summary().all_passed());
        assert!(!report.fully_passed());

        report.groups[0].dropped.clear();
        assert!(report.fully_passed());
    }
}
