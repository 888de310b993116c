//! Test executor: one agent invocation, graded into a [`TestResult`].
//!
//! Invocation failures are recorded in the result, never returned as errors,
//! so one broken test cannot stop a run.

use chrono::Local;
use tracing::{debug, instrument, warn};

use crate::core::extract::CommandExtractor;
use crate::core::rules::Rules;
use crate::core::types::{ExecutionFailure, TestCase, TestResult, Verdict};
use crate::core::validate::Validator;
use crate::io::agent::{Agent, AgentOutcome};

/// Command extraction plus validation for one rule set.
#[derive(Debug, Clone)]
pub struct Grader {
    extractor: CommandExtractor,
    validator: Validator,
}

impl Grader {
    pub fn new(rules: &Rules) -> Self {
        Self {
            extractor: CommandExtractor::new(rules),
            validator: Validator::new(rules),
        }
    }

    /// Extract the command from `stdout` and grade it.
    pub fn grade(&self, group: &str, case: &TestCase, stdout: &str) -> (Option<String>, Verdict) {
        let command = self.extractor.extract(stdout);
        let verdict = self
            .validator
            .validate(group, case, stdout, command.as_deref());
        (command, verdict)
    }
}

/// Run one test case against the agent and grade the response.
///
/// Start and end timestamps bracket the agent call only.
#[instrument(skip_all, fields(group = %group, id = case.id))]
pub fn execute_test<A: Agent + ?Sized>(
    group: &str,
    case: &TestCase,
    agent: &A,
    grader: &Grader,
) -> TestResult {
    let started_at = Local::now();
    let invocation = agent.invoke(&case.user_request);
    let ended_at = Local::now();

    let mut result = TestResult::pending(group, case, started_at);
    result.ended_at = ended_at;

    let (stdout, stderr) = match invocation {
        Ok(AgentOutcome::Completed { stdout, stderr }) => (stdout, stderr),
        Ok(AgentOutcome::TimedOut { after }) => {
            let secs = after.as_secs();
            warn!(secs, "agent timed out");
            result.execution_failure = Some(ExecutionFailure::Timeout { secs });
            (
                String::new(),
                format!("ERROR: Test timed out after {secs} seconds"),
            )
        }
        Err(err) => {
            let fault = format!("{err:#}");
            warn!(error = %fault, "agent invocation failed");
            let stderr = format!("ERROR: {fault}");
            result.execution_failure = Some(ExecutionFailure::Fault(fault));
            (String::new(), stderr)
        }
    };

    let (command, verdict) = grader.grade(group, case, &stdout);
    debug!(status = verdict.status.as_str(), command = ?command, "graded");
    result.raw_output = format!("{stdout}\n{stderr}");
    result.extracted_command = command;
    result.finish(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestStatus;
    use crate::core::validate::NO_COMMAND_REASON;
    use crate::test_support::{ScriptedAgent, sample_case};
    use std::time::Duration;

    #[test]
    fn passing_response_is_graded_from_stdout() {
        let agent = ScriptedAgent::new().respond(
            "find issues about memory leak",
            "```bash\ngh search issues \"memory leak\"\n```\n",
        );
        let case = sample_case(1, "find issues about memory leak", &["Uses `gh search issues`"]);
        let result = execute_test("search-issues", &case, &agent, &Grader::new(&Rules::default()));

        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.failure_reason, "");
        assert_eq!(
            result.extracted_command.as_deref(),
            Some("gh search issues \"memory leak\"")
        );
        assert!(result.raw_output.starts_with("```bash"));
        assert!(result.ended_at >= result.started_at);
        assert_eq!(result.execution_failure, None);
    }

    #[test]
    fn timeout_becomes_failed_result() {
        let agent = ScriptedAgent::new().time_out("slow request", Duration::from_secs(120));
        let case = sample_case(2, "slow request", &[]);
        let result = execute_test("search-prs", &case, &agent, &Grader::new(&Rules::default()));

        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.failure_reason, NO_COMMAND_REASON);
        assert_eq!(
            result.raw_output,
            "\nERROR: Test timed out after 120 seconds"
        );
        assert_eq!(
            result.execution_failure,
            Some(ExecutionFailure::Timeout { secs: 120 })
        );
        assert_eq!(result.command_display(), "NO COMMAND FOUND");
    }

    #[test]
    fn fault_becomes_failed_result() {
        let agent = ScriptedAgent::new().fail("broken", "spawn agent: No such file or directory");
        let case = sample_case(3, "broken", &[]);
        let result = execute_test("search-code", &case, &agent, &Grader::new(&Rules::default()));

        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.raw_output.contains("ERROR: spawn agent"));
        assert!(matches!(
            result.execution_failure,
            Some(ExecutionFailure::Fault(_))
        ));
    }

    #[test]
    fn stderr_is_kept_but_not_graded() {
        let agent = ScriptedAgent::new().respond_with_stderr(
            "req",
            "No command here.",
            "`gh search issues bug`",
        );
        let case = sample_case(4, "req", &[]);
        let result = execute_test("search-issues", &case, &agent, &Grader::new(&Rules::default()));

        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.extracted_command, None);
        assert_eq!(result.raw_output, "No command here.\n`gh search issues bug`");
    }
}
