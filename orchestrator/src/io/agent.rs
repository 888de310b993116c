//! Agent-under-test abstraction.
//!
//! The [`Agent`] trait decouples test execution from the actual agent
//! backend (a wrapper script by default). Tests use scripted agents that
//! return predetermined responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::config::AgentConfig;
use crate::io::process::run_command_with_timeout;

/// Outcome of one agent invocation that got as far as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Completed { stdout: String, stderr: String },
    TimedOut { after: Duration },
}

/// Abstraction over agent-under-test backends.
///
/// Shared by every worker of a run, hence `Sync`.
pub trait Agent: Sync {
    /// Send one user request. `Err` means the invocation itself failed.
    fn invoke(&self, user_request: &str) -> Result<AgentOutcome>;
}

/// Agent that spawns the configured command with the request as its last argument.
#[derive(Debug, Clone)]
pub struct ScriptAgent {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ScriptAgent {
    pub fn new(config: &AgentConfig, workdir: PathBuf, output_limit_bytes: usize) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent.command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir,
            timeout: config.timeout(),
            output_limit_bytes,
        })
    }
}

impl Agent for ScriptAgent {
    #[instrument(skip_all, fields(program = %self.program, timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, user_request: &str) -> Result<AgentOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(user_request)
            .current_dir(&self.workdir);

        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run agent {}", self.program))?;

        if output.timed_out {
            return Ok(AgentOutcome::TimedOut {
                after: self.timeout,
            });
        }
        debug!(exit_code = ?output.status.code(), "agent finished");
        Ok(AgentOutcome::Completed {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        })
    }
}
