//! Collaborator prompt rendering.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::warn;

use crate::core::controller::Role;
use crate::io::collaborators::{DECISION_NOTES, FIXER_NOTES, REVIEWER_NOTES};

const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");
const FIXER_TEMPLATE: &str = include_str!("prompts/fixer.md");

#[derive(Debug, Clone, Serialize)]
struct NoteNames {
    reviewer: &'static str,
    decision: &'static str,
    fixer: &'static str,
}

const NOTE_NAMES: NoteNames = NoteNames {
    reviewer: REVIEWER_NOTES,
    decision: DECISION_NOTES,
    fixer: FIXER_NOTES,
};

/// Run context shared by every collaborator prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub run_dir: &'a Path,
    pub start_commit: &'a str,
    /// Number of known run directories, including earlier sessions.
    pub run_number: usize,
    pub max_runs: u32,
    /// Decision notes of the run directly before this one, if present.
    pub previous_decision_notes: Option<&'a Path>,
    /// Earlier run directories that hold decision notes, oldest first.
    pub prior_decision_runs: &'a [PathBuf],
}

/// Template engine wrapper around minijinja.
pub struct PromptRenderer {
    env: Environment<'static>,
    guidance: PathBuf,
}

impl PromptRenderer {
    pub fn new(guidance: PathBuf) -> Self {
        let mut env = Environment::new();
        env.add_template("reviewer", REVIEWER_TEMPLATE)
            .expect("reviewer template should be valid");
        env.add_template("decision", DECISION_TEMPLATE)
            .expect("decision template should be valid");
        env.add_template("fixer", FIXER_TEMPLATE)
            .expect("fixer template should be valid");
        Self { env, guidance }
    }

    /// Render the prompt for `role`, embedding its agent definition text.
    pub fn render(
        &self,
        role: Role,
        definition: &str,
        inputs: &PromptInputs<'_>,
        timeout: Duration,
    ) -> Result<String> {
        let template = self.env.get_template(role.as_str())?;
        let prior_decision_runs: Vec<String> = inputs
            .prior_decision_runs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect();
        let rendered = template.render(context! {
            definition => definition.trim(),
            guidance => self.guidance.display().to_string(),
            notes => NOTE_NAMES,
            run_dir => inputs.run_dir.display().to_string(),
            start_commit => inputs.start_commit,
            run_number => inputs.run_number,
            max_runs => inputs.max_runs,
            previous_decision_notes => inputs.previous_decision_notes.map(|p| p.display().to_string()),
            prior_decision_runs => prior_decision_runs,
            timeout_minutes => timeout.as_secs().div_ceil(60),
        })?;
        Ok(rendered)
    }
}

/// Read an agent definition document, or an empty string when unreadable.
pub fn read_definition(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "agent definition unreadable, continuing without it");
            String::new()
        }
    }
}
