//! Session driver for `orchestrator run`.
//!
//! Performs the work of each controller stage (RUN, REVIEW, DECIDE, FIX) and
//! feeds the outcome back into [`Controller`] until it halts. Collaborator
//! errors never escape: they become a `CollaboratorFailed` halt. A RUN pass
//! that fails after the first one becomes a `RunFailed` halt. Only setup
//! errors (first pass, report directory allocation) are returned.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use tracing::{error, info, warn};

use crate::core::controller::{Controller, Event, HaltReason, Role, Stage, StagePolicy};
use crate::core::stats::RunReport;
use crate::core::types::{Decision, DecisionAction};
use crate::exit_codes;
use crate::io::agent::Agent;
use crate::io::collaborators::{
    Collaborators, DECISION_NOTES, FIXER_NOTES, REVIEWER_NOTES, has_notes,
};
use crate::io::config::OrchestratorConfig;
use crate::io::executor::Grader;
use crate::io::reports::REPORT_FILE;
use crate::io::scenarios::load_groups;
use crate::session::Session;
use crate::suite::{Console, run_suite};

/// Loop settings resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub scenarios_dir: PathBuf,
    pub scenario_suffix: String,
    pub workers: usize,
    pub max_iterations: u32,
    pub policy: StagePolicy,
}

impl SessionSettings {
    pub fn from_config(config: &OrchestratorConfig, policy: StagePolicy) -> Self {
        Self {
            scenarios_dir: config.scenarios_dir.clone(),
            scenario_suffix: config.scenario_suffix.clone(),
            workers: config.workers,
            max_iterations: config.max_iterations,
            policy,
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Run directories created by this session, oldest first.
    pub runs: Vec<PathBuf>,
    pub last_report: Option<RunReport>,
    pub halt: HaltReason,
}

impl SessionOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.halt.is_collaborator_failure() {
            return exit_codes::COLLABORATOR_FAILED;
        }
        if matches!(self.halt, HaltReason::RunFailed { .. }) {
            return exit_codes::TESTS_FAILED;
        }
        match &self.last_report {
            Some(report) if !report.fully_passed() => exit_codes::TESTS_FAILED,
            _ => exit_codes::OK,
        }
    }
}

/// Drive RUN → REVIEW → DECIDE → FIX until the controller halts.
pub fn run_session<A: Agent + ?Sized, C: Collaborators + ?Sized>(
    settings: &SessionSettings,
    session: &mut Session,
    agent: &A,
    grader: &Grader,
    collaborators: &C,
    console: &Console,
) -> Result<SessionOutcome> {
    let mut controller = Controller::new(settings.policy, settings.max_iterations)?;
    print_banner(console, session, settings);
    let mut last_report = None;

    let halt = loop {
        let event = match controller.stage().clone() {
            Stage::Halted(reason) => break reason,
            Stage::Run => {
                match run_once(settings, session, &controller, agent, grader, console) {
                    Ok(report) => {
                        last_report = Some(report);
                        Event::RunCompleted
                    }
                    Err(err) if controller.iteration() > 1 => {
                        run_failure_event(console, controller.iteration(), &err)
                    }
                    Err(err) => return Err(err),
                }
            }
            Stage::Review => review(session, &controller, collaborators, console)?,
            Stage::Decide => decide(session, &controller, collaborators, console)?,
            Stage::Fix => fix(session, &controller, collaborators, console)?,
        };
        controller.advance(event)?;
        report_transition(console, &controller);
    };

    info!(%halt, runs = session.session_run_dirs().len(), "session halted");
    let outcome = SessionOutcome {
        runs: session.session_run_dirs().to_vec(),
        last_report,
        halt,
    };
    print_final_summary(console, session, &outcome);
    Ok(outcome)
}

fn rule() -> String {
    "=".repeat(80)
}

fn heading(console: &Console, title: &str) {
    console.line(format!("\n{}", rule()));
    console.line(title);
    console.line(rule());
}

fn enabled(flag: bool) -> &'static str {
    if flag { "Enabled" } else { "Disabled" }
}

fn report_path(run_dir: &Path) -> String {
    run_dir.join(REPORT_FILE).display().to_string()
}

fn print_banner(console: &Console, session: &Session, settings: &SessionSettings) {
    console.line(rule());
    console.line("Automated Test Runner");
    console.line(rule());
    console.line(format!(
        "Start time: {}",
        session.started_at().format("%Y-%m-%d %H:%M:%S")
    ));
    console.line(format!("Git commit: {}", session.start_commit()));
    console.line(format!("Parallel workers: {}", settings.workers));
    console.line(format!("Maximum test runs: {}", settings.max_iterations));
    console.line(format!("Test reviewer: {}", enabled(settings.policy.review())));
    console.line(format!("Decision agent: {}", enabled(settings.policy.decide())));
    console.line(format!("Fixer agent: {}", enabled(settings.policy.fix())));
    console.line(format!("Verbose mode: {}", enabled(session.verbose())));

    let prior = session.prior_run_dirs();
    if !prior.is_empty() {
        let noun = if prior.len() == 1 { "directory" } else { "directories" };
        console.line(format!("\nFound {} existing report {noun}:", prior.len()));
        for dir in prior {
            console.line(format!("  - {}", dir.display()));
        }
    }
}

fn run_once<A: Agent + ?Sized>(
    settings: &SessionSettings,
    session: &mut Session,
    controller: &Controller,
    agent: &A,
    grader: &Grader,
    console: &Console,
) -> Result<RunReport> {
    let iteration = controller.iteration();
    heading(
        console,
        &format!("TEST RUN {iteration}/{}", controller.max_iterations()),
    );
    let run_dir = session.begin_run()?;
    console.line(format!("Report directory: {}", run_dir.display()));

    let groups = load_groups(&settings.scenarios_dir, &settings.scenario_suffix)?;
    for group in &groups {
        for malformed in &group.malformed {
            console.line(format!(
                "WARNING: {}: skipped malformed test block ({malformed})",
                group.name
            ));
        }
    }
    let report = run_suite(&groups, &run_dir, settings.workers, agent, grader, console)?;

    let summary = report.summary();
    heading(console, &format!("TEST RUN {iteration} COMPLETE"));
    console.line(format!("Total tests: {}", summary.total));
    console.line(format!(
        "Passed: {} ({:.1}%)",
        summary.passed,
        summary.pass_rate()
    ));
    console.line(format!(
        "Failed: {} ({:.1}%)",
        summary.failed,
        summary.fail_rate()
    ));
    let dropped = report.dropped_count();
    if dropped > 0 {
        console.line(format!("Dropped: {dropped} (see results.json)"));
    }
    console.line(format!("Execution time: {:.1}s", report.duration_secs()));
    console.line(format!("Report location: {}", report_path(&run_dir)));
    Ok(report)
}

fn run_failure_event(console: &Console, iteration: u32, err: &anyhow::Error) -> Event {
    let message = format!("{err:#}");
    error!(iteration, error = %message, "test run failed");
    console.line(format!("ERROR: test run {iteration} failed: {message}"));
    Event::RunFailed { message }
}

fn failure_event(console: &Console, role: Role, err: &anyhow::Error) -> Event {
    let message = format!("{err:#}");
    warn!(%role, error = %message, "collaborator failed");
    console.line(format!("ERROR: {role} agent failed: {message}"));
    Event::CollaboratorFailed { role, message }
}

fn review<C: Collaborators + ?Sized>(
    session: &Session,
    controller: &Controller,
    collaborators: &C,
    console: &Console,
) -> Result<Event> {
    let request = session.collaborator_request(controller.max_iterations())?;
    console.line("\nRunning test reviewer agent...");
    Ok(match collaborators.review(&request) {
        Ok(()) => {
            let notes = request.notes_path(REVIEWER_NOTES);
            if notes.is_file() {
                console.line(format!("Test review complete: {}", notes.display()));
            } else {
                console.line(format!(
                    "WARNING: reviewer finished without writing {REVIEWER_NOTES}"
                ));
            }
            Event::ReviewSucceeded
        }
        Err(err) => failure_event(console, Role::Reviewer, &err),
    })
}

fn decide<C: Collaborators + ?Sized>(
    session: &Session,
    controller: &Controller,
    collaborators: &C,
    console: &Console,
) -> Result<Event> {
    let request = session.collaborator_request(controller.max_iterations())?;
    console.line("\nRunning decision agent...");
    Ok(match collaborators.decide(&request) {
        Ok(decision) => {
            print_decision(console, &decision);
            Event::Decided(decision)
        }
        Err(err) => failure_event(console, Role::Decision, &err),
    })
}

fn print_decision(console: &Console, decision: &Decision) {
    let action = match decision.action {
        DecisionAction::Rerun => "RERUN",
        DecisionAction::Halt => "HALT",
    };
    console.line(format!(
        "Decision: {action} (confidence: {})",
        decision.confidence
    ));
    console.line(format!("Reasoning: {}", decision.reasoning));
    if decision.action == DecisionAction::Halt && !decision.human_tasks.is_empty() {
        console.line("Human tasks needed:");
        for task in &decision.human_tasks {
            console.line(format!("  - {task}"));
        }
    }
}

fn fix<C: Collaborators + ?Sized>(
    session: &Session,
    controller: &Controller,
    collaborators: &C,
    console: &Console,
) -> Result<Event> {
    let request = session.collaborator_request(controller.max_iterations())?;
    for notes in [REVIEWER_NOTES, DECISION_NOTES] {
        if !has_notes(&request.run_dir, notes) {
            console.line(format!(
                "WARNING: {notes} not found in {}",
                request.run_dir.display()
            ));
        }
    }
    console.line("\nRunning fixer agent...");
    Ok(match collaborators.fix(&request) {
        Ok(()) => {
            let notes = request.notes_path(FIXER_NOTES);
            if notes.is_file() {
                console.line(format!("Fixes complete: {}", notes.display()));
            } else {
                console.line(format!(
                    "WARNING: fixer finished without writing {FIXER_NOTES}"
                ));
            }
            Event::FixSucceeded
        }
        Err(err) => failure_event(console, Role::Fixer, &err),
    })
}

/// Explain RERUN outcomes that the decision line alone does not show.
fn report_transition(console: &Console, controller: &Controller) {
    let max = controller.max_iterations();
    match controller.stage() {
        Stage::Run if controller.rerun_without_fix() => {
            console.line("WARNING: Re-running tests without implementing fixes!");
            console.line(format!(
                "Next run will be {}/{max}",
                controller.iteration()
            ));
        }
        Stage::Fix => console.line(format!(
            "Applying fixes; next run will be {}/{max}",
            controller.iteration() + 1
        )),
        Stage::Halted(HaltReason::MaxIterationsReached { max_iterations }) => {
            console.line(format!(
                "Decision agent wanted to re-run, but maximum test runs ({max_iterations}) reached"
            ));
        }
        _ => {}
    }
}

fn print_final_summary(console: &Console, session: &Session, outcome: &SessionOutcome) {
    heading(console, "TEST EXECUTION COMPLETE");
    console.line(format!("Stopped: {}", outcome.halt));
    console.line(format!("Total runs: {}", outcome.runs.len()));
    let elapsed = (Local::now() - session.started_at()).num_milliseconds() as f64 / 1000.0;
    console.line(format!("Total time: {elapsed:.1}s"));
    match outcome.runs.as_slice() {
        [] => {}
        [only] => console.line(format!("Final report: {}", report_path(only))),
        runs => {
            console.line("Reports:");
            for dir in runs {
                console.line(format!("  - {}", report_path(dir)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::Rules;
    use crate::test_support::{
        ScenarioFixture, ScriptedAgent, ScriptedCollaborators, ScriptedStep, captured_console,
        sample_case,
    };

    const GOOD: &str = "```bash\ngh search issues \"memory leak\"\n```\n";

    fn fixture() -> ScenarioFixture {
        let fixture = ScenarioFixture::new().expect("fixture");
        fixture
            .write_group(
                "gh-search-issues-tests",
                &[
                    sample_case(1, "find issues about memory leak", &["Uses `gh search issues`"]),
                    sample_case(2, "find nothing", &[]),
                ],
            )
            .expect("write group");
        fixture
    }

    fn settings(fixture: &ScenarioFixture, policy: StagePolicy, max: u32) -> SessionSettings {
        SessionSettings {
            scenarios_dir: fixture.scenarios_dir(),
            scenario_suffix: "-tests.md".to_string(),
            workers: 2,
            max_iterations: max,
            policy,
        }
    }

    fn agent() -> ScriptedAgent {
        ScriptedAgent::new().respond("find issues about memory leak", GOOD)
    }

    fn session(fixture: &ScenarioFixture) -> Session {
        Session::start(&fixture.reports_dir(), "abc1234".to_string(), false).expect("session")
    }

    #[test]
    fn review_disabled_is_a_single_run() {
        let fixture = fixture();
        let mut session = session(&fixture);
        let collaborators = ScriptedCollaborators::new();
        let (console, captured) = captured_console();

        let outcome = run_session(
            &settings(&fixture, StagePolicy::new(false, true, true), 5),
            &mut session,
            &agent(),
            &Grader::new(&Rules::default()),
            &collaborators,
            &console,
        )
        .expect("session");

        assert_eq!(outcome.halt, HaltReason::ReviewDisabled);
        assert_eq!(outcome.runs.len(), 1);
        assert!(collaborators.roles().is_empty());
        assert_eq!(outcome.exit_code(), exit_codes::TESTS_FAILED);

        let output = captured.text();
        assert!(output.contains("TEST RUN 1/5"));
        assert!(output.contains("Test reviewer: Disabled"));
        assert!(output.contains("Fixer agent: Disabled"));
        assert!(output.contains("Passed: 1 (50.0%)"));
        assert!(output.contains(&format!("Final report: {}", report_path(&outcome.runs[0]))));
    }

    #[test]
    fn rerun_with_fixes_stops_at_the_ceiling() {
        let fixture = fixture();
        let mut session = session(&fixture);
        let collaborators = ScriptedCollaborators::new()
            .decide_rerun("one")
            .decide_rerun("two")
            .decide_rerun("three");
        let (console, captured) = captured_console();

        let outcome = run_session(
            &settings(&fixture, StagePolicy::all(), 3),
            &mut session,
            &agent(),
            &Grader::new(&Rules::default()),
            &collaborators,
            &console,
        )
        .expect("session");

        assert_eq!(
            outcome.halt,
            HaltReason::MaxIterationsReached { max_iterations: 3 }
        );
        assert_eq!(outcome.runs.len(), 3);
        assert_eq!(
            collaborators.roles(),
            vec![
                Role::Reviewer,
                Role::Decision,
                Role::Fixer,
                Role::Reviewer,
                Role::Decision,
                Role::Fixer,
                Role::Reviewer,
                Role::Decision,
            ]
        );
        let output = captured.text();
        assert!(output.contains("maximum test runs (3) reached"));
        assert!(output.contains("Reports:"));
        assert!(!output.contains("WARNING: REVIEWER-NOTES.md not found"));
    }

    #[test]
    fn rerun_without_fixer_warns_and_reruns() {
        let fixture = fixture();
        let mut session = session(&fixture);
        let collaborators = ScriptedCollaborators::new()
            .decide_rerun("flaky")
            .decide_halt("good enough");
        let (console, captured) = captured_console();

        let outcome = run_session(
            &settings(&fixture, StagePolicy::new(true, true, false), 5),
            &mut session,
            &agent(),
            &Grader::new(&Rules::default()),
            &collaborators,
            &console,
        )
        .expect("session");

        assert!(matches!(outcome.halt, HaltReason::Decided { .. }));
        assert_eq!(outcome.runs.len(), 2);
        assert!(!collaborators.roles().contains(&Role::Fixer));
        let output = captured.text();
        assert!(output.contains("WARNING: Re-running tests without implementing fixes!"));
        assert!(output.contains("Next run will be 2/5"));
        assert!(output.contains("TEST RUN 2/5"));
    }

    #[test]
    fn halt_prints_human_tasks_and_last_report() {
        let fixture = fixture();
        let mut session = session(&fixture);
        let decision = Decision {
            action: DecisionAction::Halt,
            reasoning: "needs credentials".to_string(),
            confidence: "medium".to_string(),
            human_tasks: vec!["Add a GH_TOKEN secret".to_string()],
        };
        let collaborators = ScriptedCollaborators::new()
            .with_decision(ScriptedStep::Succeed(decision));
        let (console, captured) = captured_console();

        let outcome = run_session(
            &settings(&fixture, StagePolicy::all(), 5),
            &mut session,
            &agent(),
            &Grader::new(&Rules::default()),
            &collaborators,
            &console,
        )
        .expect("session");

        assert_eq!(outcome.runs.len(), 1);
        let output = captured.text();
        assert!(output.contains("Decision: HALT (confidence: medium)"));
        assert!(output.contains("Human tasks needed:\n  - Add a GH_TOKEN secret"));
        assert!(output.contains("Stopped: decision agent chose HALT: needs credentials"));
    }

    #[test]
    fn missing_scenarios_dir_is_a_setup_error() {
        let fixture = fixture();
        let mut session = session(&fixture);
        let mut settings = settings(&fixture, StagePolicy::all(), 5);
        settings.scenarios_dir = fixture.root().join("nope");
        let (console, _captured) = captured_console();

        let err = run_session(
            &settings,
            &mut session,
            &agent(),
            &Grader::new(&Rules::default()),
            &ScriptedCollaborators::new(),
            &console,
        )
        .expect_err("setup error");
        assert!(format!("{err:#}").contains("read scenarios dir"));
    }
}
