//! Orchestrator configuration stored in `orchestrator.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::controller::Role;
use crate::core::rules::Rules;

pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.toml";

/// Orchestrator configuration (TOML).
///
/// Meant to be edited by humans. Missing fields fall back to the defaults
/// below; relative paths resolve against the working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory holding the scenario documents.
    pub scenarios_dir: PathBuf,
    /// File-name suffix of scenario documents; the group name is the stem.
    pub scenario_suffix: String,
    /// Root under which run report directories are created.
    pub reports_dir: PathBuf,
    /// Worker pool width for one run.
    pub workers: usize,
    /// Hard ceiling on RUN passes per session.
    pub max_iterations: u32,
    /// Keep at most this many bytes of each subprocess stream.
    pub output_limit_bytes: usize,
    pub agent: AgentConfig,
    pub collaborators: CollaboratorsConfig,
    pub rules: Rules,
}

/// Agent under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program plus leading args; the user request is appended as the last arg.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["testing/scripts/run-single-test.sh".to_string()],
            timeout_secs: 120,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External advisory collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollaboratorsConfig {
    /// Program plus leading args of the headless agent CLI.
    pub command: Vec<String>,
    /// Human decisions document every collaborator reads first.
    pub guidance: PathBuf,
    pub reviewer: RoleConfig,
    pub decision: RoleConfig,
    pub fixer: RoleConfig,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
            guidance: PathBuf::from("testing/GUIDANCE.md"),
            reviewer: RoleConfig::new("agents/test-reviewer.md", "Read,Bash,Write,Grep", 300),
            decision: RoleConfig::new("agents/product-manager.md", "Read,Bash,Write,Grep", 180),
            fixer: RoleConfig::new(
                "agents/developer.md",
                "Read,Write,Edit,Bash,Grep,Glob",
                600,
            ),
        }
    }
}

impl CollaboratorsConfig {
    pub fn role(&self, role: Role) -> &RoleConfig {
        match role {
            Role::Reviewer => &self.reviewer,
            Role::Decision => &self.decision,
            Role::Fixer => &self.fixer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    /// Agent definition document embedded into the role prompt.
    pub definition: PathBuf,
    /// Comma-separated tool allow-list passed to the collaborator CLI.
    pub allowed_tools: String,
    pub timeout_secs: u64,
}

impl RoleConfig {
    fn new(definition: &str, allowed_tools: &str, timeout_secs: u64) -> Self {
        Self {
            definition: PathBuf::from(definition),
            allowed_tools: allowed_tools.to_string(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scenarios_dir: PathBuf::from("testing/scenarios"),
            scenario_suffix: "-tests.md".to_string(),
            reports_dir: PathBuf::from("testing/reports"),
            workers: 8,
            max_iterations: 5,
            output_limit_bytes: 1_000_000,
            agent: AgentConfig::default(),
            collaborators: CollaboratorsConfig::default(),
            rules: Rules::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.scenario_suffix.is_empty() {
            return Err(anyhow!("scenario_suffix must be non-empty"));
        }
        validate_command("agent.command", &self.agent.command)?;
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        validate_command("collaborators.command", &self.collaborators.command)?;
        for role in [Role::Reviewer, Role::Decision, Role::Fixer] {
            if self.collaborators.role(role).timeout_secs == 0 {
                return Err(anyhow!("collaborators.{role}.timeout_secs must be > 0"));
            }
        }
        self.rules.validate()
    }
}

fn validate_command(field: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(anyhow!("{field} must be a non-empty array")),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
