//! Git metadata lookup.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

pub const UNKNOWN_COMMIT: &str = "unknown";

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Short hash of `HEAD` in `workdir`, or [`UNKNOWN_COMMIT`] on any failure.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn head_short_sha(workdir: &Path) -> String {
    match try_head_short_sha(workdir) {
        Ok(sha) => {
            debug!(%sha, "resolved start commit");
            sha
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "could not resolve git commit");
            UNKNOWN_COMMIT.to_string()
        }
    }
}

fn try_head_short_sha(workdir: &Path) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(["rev-parse", "--short", "HEAD"]).current_dir(workdir);
    let output = run_command_with_timeout(cmd, GIT_TIMEOUT, 4096)?;
    if output.timed_out {
        bail!("git rev-parse timed out");
    }
    if !output.status.success() {
        bail!(
            "git rev-parse failed with status {:?}: {}",
            output.status.code(),
            output.stderr_lossy().trim()
        );
    }
    let sha = output.stdout_lossy().trim().to_string();
    if sha.is_empty() {
        bail!("git rev-parse printed nothing");
    }
    Ok(sha)
}
