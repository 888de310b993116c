//! Test-only doubles: scripted agent, scripted collaborators, scenario fixtures.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::controller::Role;
use crate::core::types::{DEFAULT_PLATFORM, Decision, DecisionAction, TestCase};
use crate::io::agent::{Agent, AgentOutcome};
use crate::io::collaborators::{
    CollaboratorRequest, Collaborators, DECISION_NOTES, FIXER_NOTES, REVIEWER_NOTES,
};
use crate::suite::Console;

/// Create a deterministic test case named `case {id}`.
pub fn sample_case(id: u32, request: &str, criteria: &[&str]) -> TestCase {
    TestCase {
        id,
        name: format!("case {id}"),
        description: String::new(),
        user_request: request.to_string(),
        criteria: criteria.iter().map(|c| (*c).to_string()).collect(),
        platform: DEFAULT_PLATFORM.to_string(),
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Respond { stdout: String, stderr: String },
    TimeOut(Duration),
    Fail(String),
    Panic(String),
}

/// Agent double keyed by user request.
///
/// Requests without a script answer with the fallback reply, which defaults
/// to an empty response.
#[derive(Debug)]
pub struct ScriptedAgent {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    fallback: Reply,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            delays: HashMap::new(),
            fallback: Reply::Respond {
                stdout: String::new(),
                stderr: String::new(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, request: &str, stdout: &str) -> Self {
        self.respond_with_stderr(request, stdout, "")
    }

    pub fn respond_with_stderr(mut self, request: &str, stdout: &str, stderr: &str) -> Self {
        self.replies.insert(
            request.to_string(),
            Reply::Respond {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    pub fn time_out(mut self, request: &str, after: Duration) -> Self {
        self.replies
            .insert(request.to_string(), Reply::TimeOut(after));
        self
    }

    pub fn fail(mut self, request: &str, message: &str) -> Self {
        self.replies
            .insert(request.to_string(), Reply::Fail(message.to_string()));
        self
    }

    /// Panic inside the worker that runs `request`.
    pub fn panic_on(mut self, request: &str) -> Self {
        self.replies.insert(
            request.to_string(),
            Reply::Panic(format!("scripted panic for {request:?}")),
        );
        self
    }

    /// Sleep before answering `request`.
    pub fn delay(mut self, request: &str, delay: Duration) -> Self {
        self.delays.insert(request.to_string(), delay);
        self
    }

    /// Reply used for every request without its own script.
    pub fn fallback(mut self, stdout: &str) -> Self {
        self.fallback = Reply::Respond {
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        self
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, user_request: &str) -> Result<AgentOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(user_request.to_string());
        }
        if let Some(delay) = self.delays.get(user_request) {
            thread::sleep(*delay);
        }
        match self.replies.get(user_request).unwrap_or(&self.fallback) {
            Reply::Respond { stdout, stderr } => Ok(AgentOutcome::Completed {
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            }),
            Reply::TimeOut(after) => Ok(AgentOutcome::TimedOut { after: *after }),
            Reply::Fail(message) => Err(anyhow!("{message}")),
            Reply::Panic(message) => panic!("{message}"),
        }
    }
}

/// Scripted outcome of one collaborator call.
#[derive(Debug, Clone)]
pub enum ScriptedStep<T> {
    Succeed(T),
    Fail(String),
}

/// Collaborator double with one outcome queue per role.
///
/// Empty queues succeed for review and fix; an empty decision queue is an
/// error so a test cannot silently loop. Successful calls write the role's
/// notes file into the run directory, like the real collaborators do.
#[derive(Debug, Default)]
pub struct ScriptedCollaborators {
    reviews: Mutex<VecDeque<ScriptedStep<()>>>,
    decisions: Mutex<VecDeque<ScriptedStep<Decision>>>,
    fixes: Mutex<VecDeque<ScriptedStep<()>>>,
    skip_notes: bool,
    requests: Mutex<Vec<(Role, CollaboratorRequest)>>,
}

impl ScriptedCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide_rerun(self, reasoning: &str) -> Self {
        self.with_decision(ScriptedStep::Succeed(decision(DecisionAction::Rerun, reasoning)))
    }

    pub fn decide_halt(self, reasoning: &str) -> Self {
        self.with_decision(ScriptedStep::Succeed(decision(DecisionAction::Halt, reasoning)))
    }

    pub fn with_decision(self, step: ScriptedStep<Decision>) -> Self {
        push(&self.decisions, step);
        self
    }

    pub fn with_review(self, step: ScriptedStep<()>) -> Self {
        push(&self.reviews, step);
        self
    }

    pub fn with_fix(self, step: ScriptedStep<()>) -> Self {
        push(&self.fixes, step);
        self
    }

    /// Do not write notes files on success.
    pub fn without_notes(mut self) -> Self {
        self.skip_notes = true;
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<(Role, CollaboratorRequest)> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Roles called so far, in call order.
    pub fn roles(&self) -> Vec<Role> {
        self.requests().into_iter().map(|(role, _)| role).collect()
    }

    fn record(&self, role: Role, request: &CollaboratorRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((role, request.clone()));
        }
    }

    fn write_notes(&self, request: &CollaboratorRequest, file: &str) -> Result<()> {
        if self.skip_notes {
            return Ok(());
        }
        fs::write(
            request.notes_path(file),
            format!("**Git Commit:** {}\n", request.start_commit),
        )?;
        Ok(())
    }
}

fn decision(action: DecisionAction, reasoning: &str) -> Decision {
    Decision {
        action,
        reasoning: reasoning.to_string(),
        confidence: "high".to_string(),
        human_tasks: Vec::new(),
    }
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    if let Ok(mut queue) = queue.lock() {
        queue.push_back(item);
    }
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().ok().and_then(|mut queue| queue.pop_front())
}

impl Collaborators for ScriptedCollaborators {
    fn review(&self, request: &CollaboratorRequest) -> Result<()> {
        self.record(Role::Reviewer, request);
        match pop(&self.reviews).unwrap_or(ScriptedStep::Succeed(())) {
            ScriptedStep::Succeed(()) => self.write_notes(request, REVIEWER_NOTES),
            ScriptedStep::Fail(message) => bail!("{message}"),
        }
    }

    fn decide(&self, request: &CollaboratorRequest) -> Result<Decision> {
        self.record(Role::Decision, request);
        match pop(&self.decisions) {
            Some(ScriptedStep::Succeed(decision)) => {
                self.write_notes(request, DECISION_NOTES)?;
                Ok(decision)
            }
            Some(ScriptedStep::Fail(message)) => bail!("{message}"),
            None => bail!("no scripted decision left"),
        }
    }

    fn fix(&self, request: &CollaboratorRequest) -> Result<()> {
        self.record(Role::Fixer, request);
        match pop(&self.fixes).unwrap_or(ScriptedStep::Succeed(())) {
            ScriptedStep::Succeed(()) => self.write_notes(request, FIXER_NOTES),
            ScriptedStep::Fail(message) => bail!("{message}"),
        }
    }
}

/// Temporary project layout with a scenarios directory and a reports root.
pub struct ScenarioFixture {
    temp: TempDir,
}

impl ScenarioFixture {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        fs::create_dir_all(temp.path().join("testing/scenarios"))?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn scenarios_dir(&self) -> PathBuf {
        self.root().join("testing/scenarios")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root().join("testing/reports")
    }

    /// Write `<group>.md` holding one block per case.
    pub fn write_group(&self, group: &str, cases: &[TestCase]) -> Result<PathBuf> {
        let mut doc = format!("# {group}\n\n");
        for case in cases {
            let _ = writeln!(doc, "## Test {}: {}", case.id, case.name);
            if !case.description.is_empty() {
                let _ = writeln!(doc, "**Description:** {}", case.description);
            }
            let _ = writeln!(doc, "**User Request:** \"{}\"", case.user_request);
            let _ = writeln!(doc, "**Platform:** {}", case.platform);
            if !case.criteria.is_empty() {
                let _ = writeln!(doc, "**Expected Criteria:**");
                for criterion in &case.criteria {
                    let _ = writeln!(doc, "- {criterion}");
                }
            }
            doc.push('\n');
        }
        let path = self.scenarios_dir().join(format!("{group}.md"));
        fs::write(&path, doc)?;
        Ok(path)
    }

    /// Write a raw scenario document.
    pub fn write_raw(&self, file_name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.scenarios_dir().join(file_name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Console sink whose text the test body can read back.
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn text(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn captured_console() -> (Console, CapturedOutput) {
    let captured = CapturedOutput::default();
    (Console::with_writer(captured.clone()), captured)
}
