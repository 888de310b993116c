//! Scenario document discovery.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::scenario::{MalformedScenario, parse};
use crate::core::types::TestCase;

/// One scenario document and the cases parsed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioGroup {
    /// File stem of the document, e.g. `gh-search-code-tests`.
    pub name: String,
    pub path: PathBuf,
    pub cases: Vec<TestCase>,
    pub malformed: Vec<MalformedScenario>,
}

/// Load every `*<suffix>` document in `dir`, sorted by file name.
///
/// Malformed blocks are logged and skipped; an unreadable directory or file
/// is an error.
pub fn load_groups(dir: &Path, suffix: &str) -> Result<Vec<ScenarioGroup>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read scenarios dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));
        if matches && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut groups = Vec::with_capacity(paths.len());
    for path in paths {
        groups.push(load_group(&path)?);
    }
    info!(dir = %dir.display(), groups = groups.len(), "scenario groups loaded");
    Ok(groups)
}

fn load_group(path: &Path) -> Result<ScenarioGroup> {
    let source =
        fs::read_to_string(path).with_context(|| format!("read scenario {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parsed = parse(&source);
    for malformed in &parsed.malformed {
        warn!(group = %name, %malformed, "skipping malformed test block");
    }
    Ok(ScenarioGroup {
        name,
        path: path.to_path_buf(),
        cases: parsed.cases,
        malformed: parsed.malformed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_matching_documents_in_name_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::write(
            dir.join("gh-search-prs-tests.md"),
            "## Test 1: Open prs\n**User Request:** \"open prs\"\n",
        )
        .expect("write");
        fs::write(
            dir.join("gh-search-code-tests.md"),
            "## Test 1: Code\n**User Request:** \"find code\"\n## Test x: Bad\n",
        )
        .expect("write");
        fs::write(dir.join("README.md"), "## Test 1: Ignored\n").expect("write");

        let groups = load_groups(dir, "-tests.md").expect("load");
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["gh-search-code-tests", "gh-search-prs-tests"]);
        assert_eq!(groups[0].cases.len(), 1);
        assert_eq!(groups[0].malformed.len(), 1);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_groups(&temp.path().join("missing"), "-tests.md").expect_err("missing");
        assert!(format!("{err:#}").contains("read scenarios dir"));
    }
}
