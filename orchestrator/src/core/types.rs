//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between the scenario loader, the
//! validator, the run coordinator and the iteration controller. They carry no
//! I/O handles and serialize deterministically.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Placeholder rendered wherever no command could be extracted.
pub const NO_COMMAND_FOUND: &str = "NO COMMAND FOUND";

/// Platform tag used when a scenario block does not declare one.
pub const DEFAULT_PLATFORM: &str = "All";

/// One behavioral test case parsed from a scenario document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Ordinal from the `## Test N:` header, unique within its group.
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Literal prompt sent to the agent under test.
    pub user_request: String,
    /// Assertion strings in document order.
    #[serde(default)]
    pub criteria: Vec<String>,
    pub platform: String,
}

/// Lifecycle status of a test result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pending,
    Pass,
    Fail,
    Skipped,
}

impl TestStatus {
    /// PASS and SKIPPED both count as passed in every aggregate.
    pub fn counts_as_passed(self) -> bool {
        matches!(self, TestStatus::Pass | TestStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Pending => "PENDING",
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skipped => "SKIPPED",
        }
    }
}

/// Validator output for one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: TestStatus,
    pub reason: String,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Pass,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Fail,
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Skipped,
            reason: reason.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status.counts_as_passed()
    }
}

/// Why an agent invocation produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionFailure {
    Timeout { secs: u64 },
    Fault(String),
}

/// Outcome of executing and validating one [`TestCase`].
///
/// Built once by the test executor in the `PENDING` state and finalized
/// exactly once through [`TestResult::finish`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub group: String,
    #[serde(flatten)]
    pub case: TestCase,
    /// Agent stdout followed by its stderr.
    pub raw_output: String,
    pub extracted_command: Option<String>,
    pub status: TestStatus,
    /// Empty unless `status` is `FAIL`.
    pub failure_reason: String,
    pub execution_failure: Option<ExecutionFailure>,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
}

impl TestResult {
    pub fn pending(group: &str, case: &TestCase, started_at: DateTime<Local>) -> Self {
        Self {
            group: group.to_string(),
            case: case.clone(),
            raw_output: String::new(),
            extracted_command: None,
            status: TestStatus::Pending,
            failure_reason: String::new(),
            execution_failure: None,
            started_at,
            ended_at: started_at,
        }
    }

    /// Apply the validator verdict. Consumes the pending result so a terminal
    /// status can only be assigned once.
    pub fn finish(mut self, verdict: Verdict) -> Self {
        debug_assert_eq!(self.status, TestStatus::Pending);
        self.failure_reason = if verdict.status == TestStatus::Fail {
            verdict.reason
        } else {
            String::new()
        };
        self.status = verdict.status;
        self
    }

    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn command_display(&self) -> &str {
        self.extracted_command.as_deref().unwrap_or(NO_COMMAND_FOUND)
    }
}

/// Action chosen by the decision-maker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Rerun,
    Halt,
}

/// Parsed decision-maker verdict for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub reasoning: String,
    pub confidence: String,
    #[serde(default)]
    pub human_tasks: Vec<String>,
}

impl Decision {
    /// HALT with low confidence, used whenever a payload cannot be trusted.
    pub fn forced_halt(reasoning: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Halt,
            reasoning: reasoning.into(),
            confidence: "low".to_string(),
            human_tasks: Vec::new(),
        }
    }
}
