//! External advisory collaborators: reviewer, decision-maker and fixer.
//!
//! The [`Collaborators`] trait has one method per role so tests can swap in
//! scripted doubles. [`ClaudeCollaborators`] spawns the headless agent CLI.
//! An `Err` from any method is a collaborator failure and halts the session;
//! an unusable decision payload is not an error but a forced HALT.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::controller::Role;
use crate::core::decision::parse_decision;
use crate::core::types::Decision;
use crate::io::config::CollaboratorsConfig;
use crate::io::process::{run_command_inherited, run_command_with_timeout};
use crate::io::prompt::{PromptInputs, PromptRenderer, read_definition};

pub const REVIEWER_NOTES: &str = "REVIEWER-NOTES.md";
pub const DECISION_NOTES: &str = "PM-NOTES.md";
pub const FIXER_NOTES: &str = "DEVELOPER-NOTES.md";

/// Context handed to every collaborator invocation.
#[derive(Debug, Clone)]
pub struct CollaboratorRequest {
    pub run_dir: PathBuf,
    pub start_commit: String,
    /// Number of known run directories, including earlier sessions.
    pub run_number: usize,
    pub max_runs: u32,
    /// Decision notes of the run directly before this one, if present.
    pub previous_decision_notes: Option<PathBuf>,
    /// Earlier run directories that hold decision notes, oldest first.
    pub prior_decision_runs: Vec<PathBuf>,
    /// Stream reviewer and fixer output instead of capturing it.
    pub verbose: bool,
}

impl CollaboratorRequest {
    fn prompt_inputs(&self) -> PromptInputs<'_> {
        PromptInputs {
            run_dir: &self.run_dir,
            start_commit: &self.start_commit,
            run_number: self.run_number,
            max_runs: self.max_runs,
            previous_decision_notes: self.previous_decision_notes.as_deref(),
            prior_decision_runs: &self.prior_decision_runs,
        }
    }

    pub fn notes_path(&self, file: &str) -> PathBuf {
        self.run_dir.join(file)
    }
}

/// Abstraction over the three advisory collaborators.
pub trait Collaborators {
    /// Analyze the run and write reviewer notes.
    fn review(&self, request: &CollaboratorRequest) -> Result<()>;
    /// Decide between RERUN and HALT. Output is always captured.
    fn decide(&self, request: &CollaboratorRequest) -> Result<Decision>;
    /// Apply fixes to the system under test.
    fn fix(&self, request: &CollaboratorRequest) -> Result<()>;
}

/// Output format requested from the agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}

/// Collaborators backed by a headless agent CLI (`claude -p ...` by default).
pub struct ClaudeCollaborators {
    config: CollaboratorsConfig,
    workdir: PathBuf,
    output_limit_bytes: usize,
    prompts: PromptRenderer,
}

impl ClaudeCollaborators {
    pub fn new(config: CollaboratorsConfig, workdir: PathBuf, output_limit_bytes: usize) -> Self {
        let prompts = PromptRenderer::new(config.guidance.clone());
        Self {
            config,
            workdir,
            output_limit_bytes,
            prompts,
        }
    }

    fn prompt(&self, role: Role, request: &CollaboratorRequest) -> Result<String> {
        let role_config = self.config.role(role);
        let definition = read_definition(&self.workdir.join(&role_config.definition));
        self.prompts.render(
            role,
            &definition,
            &request.prompt_inputs(),
            role_config.timeout(),
        )
    }

    fn command(&self, role: Role, prompt: &str, format: OutputFormat) -> Result<Command> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("collaborators.command must be a non-empty array"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg(format.as_str())
            .arg("--allowedTools")
            .arg(&self.config.role(role).allowed_tools)
            .arg("--permission-mode")
            .arg("bypassPermissions")
            .current_dir(&self.workdir);
        Ok(cmd)
    }

    /// Run a collaborator and return its stdout; live mode returns nothing.
    fn invoke(
        &self,
        role: Role,
        request: &CollaboratorRequest,
        format: OutputFormat,
        live: bool,
    ) -> Result<Option<String>> {
        let prompt = self.prompt(role, request)?;
        let cmd = self.command(role, &prompt, format)?;
        let timeout = self.config.role(role).timeout();
        info!(%role, run_dir = %request.run_dir.display(), live, "invoking collaborator");

        if live {
            let outcome = run_command_inherited(cmd, timeout)?;
            check_exit(role, outcome.timed_out, outcome.status.code(), timeout, "")?;
            return Ok(None);
        }

        let output = run_command_with_timeout(cmd, timeout, self.output_limit_bytes)?;
        let stderr = output.stderr_lossy();
        check_exit(role, output.timed_out, output.status.code(), timeout, &stderr)?;
        debug!(%role, stdout_bytes = output.stdout.len(), "collaborator finished");
        Ok(Some(output.stdout_lossy()))
    }
}

fn check_exit(
    role: Role,
    timed_out: bool,
    code: Option<i32>,
    timeout: Duration,
    stderr: &str,
) -> Result<()> {
    if timed_out {
        warn!(%role, timeout_secs = timeout.as_secs(), "collaborator timed out");
        bail!("timed out after {} seconds", timeout.as_secs());
    }
    match code {
        Some(0) => Ok(()),
        code => {
            warn!(%role, exit_code = ?code, "collaborator failed");
            let stderr = stderr.trim();
            if stderr.is_empty() {
                Err(anyhow!("exited with status {code:?}"))
            } else {
                Err(anyhow!("exited with status {code:?}: {stderr}"))
            }
        }
    }
}

impl Collaborators for ClaudeCollaborators {
    #[instrument(skip_all, fields(role = "reviewer"))]
    fn review(&self, request: &CollaboratorRequest) -> Result<()> {
        self.invoke(Role::Reviewer, request, OutputFormat::Text, request.verbose)?;
        Ok(())
    }

    #[instrument(skip_all, fields(role = "decision"))]
    fn decide(&self, request: &CollaboratorRequest) -> Result<Decision> {
        let stdout = self
            .invoke(Role::Decision, request, OutputFormat::Json, false)?
            .unwrap_or_default();
        Ok(parse_decision(&stdout))
    }

    #[instrument(skip_all, fields(role = "fixer"))]
    fn fix(&self, request: &CollaboratorRequest) -> Result<()> {
        self.invoke(Role::Fixer, request, OutputFormat::Text, request.verbose)?;
        Ok(())
    }
}

/// True when `run_dir` holds the given notes file.
pub fn has_notes(run_dir: &Path, file: &str) -> bool {
    run_dir.join(file).is_file()
}
