//! Session state shared by every stage of one controller invocation.
//!
//! The run-directory history starts with the directories left on disk by
//! earlier sessions; each RUN pass appends its own directory.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use tracing::info;

use crate::io::collaborators::{CollaboratorRequest, DECISION_NOTES, has_notes};
use crate::io::reports::{allocate_run_dir, scan_run_dirs};

#[derive(Debug, Clone)]
pub struct Session {
    reports_root: PathBuf,
    start_commit: String,
    started_at: DateTime<Local>,
    verbose: bool,
    /// Directories found on disk when the session started.
    prior_runs: usize,
    run_dirs: Vec<PathBuf>,
}

impl Session {
    /// Capture the session context and discover earlier run directories.
    pub fn start(reports_root: &Path, start_commit: String, verbose: bool) -> Result<Self> {
        let run_dirs = scan_run_dirs(reports_root)?;
        info!(root = %reports_root.display(), prior = run_dirs.len(), %start_commit, "session started");
        Ok(Self {
            reports_root: reports_root.to_path_buf(),
            start_commit,
            started_at: Local::now(),
            verbose,
            prior_runs: run_dirs.len(),
            run_dirs,
        })
    }

    pub fn start_commit(&self) -> &str {
        &self.start_commit
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Run directories left by earlier sessions.
    pub fn prior_run_dirs(&self) -> &[PathBuf] {
        &self.run_dirs[..self.prior_runs]
    }

    /// Run directories created by this session, oldest first.
    pub fn session_run_dirs(&self) -> &[PathBuf] {
        &self.run_dirs[self.prior_runs..]
    }

    pub fn current_run_dir(&self) -> Option<&Path> {
        self.session_run_dirs().last().map(PathBuf::as_path)
    }

    /// Allocate the next run directory for the session's start date.
    pub fn begin_run(&mut self) -> Result<PathBuf> {
        let dir = allocate_run_dir(&self.reports_root, self.started_at.date_naive())?;
        self.run_dirs.push(dir.clone());
        Ok(dir)
    }

    /// Collaborator context for the current run directory.
    pub fn collaborator_request(&self, max_runs: u32) -> Result<CollaboratorRequest> {
        let run_dir = self
            .current_run_dir()
            .ok_or_else(|| anyhow!("no run directory allocated in this session"))?;
        let earlier = &self.run_dirs[..self.run_dirs.len() - 1];
        let previous_decision_notes = earlier
            .last()
            .map(|dir| dir.join(DECISION_NOTES))
            .filter(|notes| notes.is_file());
        let prior_decision_runs = earlier
            .iter()
            .filter(|dir| has_notes(dir, DECISION_NOTES))
            .cloned()
            .collect();
        Ok(CollaboratorRequest {
            run_dir: run_dir.to_path_buf(),
            start_commit: self.start_commit.clone(),
            run_number: self.run_dirs.len(),
            max_runs,
            previous_decision_notes,
            prior_decision_runs,
            verbose: self.verbose,
        })
    }
}
