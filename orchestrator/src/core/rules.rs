//! Vocabulary shared by the command extractor and the validator.

use serde::{Deserialize, Serialize};

/// Command vocabulary and platform tags used when grading agent output.
///
/// Defaults target the GitHub CLI (`gh`) search skills.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Rules {
    /// Leading token of the command under test (e.g. `gh`).
    pub command_prefix: String,
    /// Canonical subcommand for search-flavored groups.
    pub search_subcommand: String,
    /// Subcommand families that must not replace the search subcommand.
    pub disallowed_search_families: Vec<String>,
    /// Platform tags the validator does not check (marked SKIPPED).
    pub skip_platforms: Vec<String>,
    /// Platform tags for environment setup tests (sanity-checked only).
    pub setup_platforms: Vec<String>,
    /// Minimum response length for setup tests.
    pub setup_min_output_chars: usize,
    /// Line prefixes accepted as setup/diagnostic commands.
    pub setup_commands: Vec<String>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            command_prefix: "gh".to_string(),
            search_subcommand: "search".to_string(),
            disallowed_search_families: vec![
                "issue".to_string(),
                "pr".to_string(),
                "repo".to_string(),
            ],
            skip_platforms: vec!["PowerShell".to_string()],
            setup_platforms: vec![
                "macOS".to_string(),
                "Ubuntu".to_string(),
                "Linux (Debian/Ubuntu)".to_string(),
            ],
            setup_min_output_chars: 50,
            setup_commands: [
                "ping ", "nslookup ", "brew ", "apt ", "sudo ", "which ", "where ",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl Rules {
    /// `"<prefix> "`, the required start of an extracted command line.
    pub fn command_lead(&self) -> String {
        format!("{} ", self.command_prefix)
    }

    /// `"<prefix> <search_subcommand>"`.
    pub fn search_command(&self) -> String {
        format!("{} {}", self.command_prefix, self.search_subcommand)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command_prefix.trim().is_empty() || self.command_prefix.contains(char::is_whitespace)
        {
            anyhow::bail!("rules.command_prefix must be a single non-empty token");
        }
        if self.search_subcommand.trim().is_empty() {
            anyhow::bail!("rules.search_subcommand must be non-empty");
        }
        Ok(())
    }
}
