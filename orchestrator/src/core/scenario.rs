//! Scenario document parsing.
//!
//! A scenario document holds numbered test blocks:
//!
//! ```text
//! ## Test 3: Search closed issues
//! **Description:** Finds closed issues by keyword
//! **User Request:** "find closed issues about memory leak"
//! **Platform:** All
//! **Expected Criteria:**
//! - Uses `gh search issues`
//! - Includes `--state closed`
//! ```
//!
//! Parsing is best-effort: a block that cannot be matched is reported as
//! [`MalformedScenario`] and skipped, every other block is still returned.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{DEFAULT_PLATFORM, TestCase};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^##\s+Test\s+([^:]*):(.*)$").expect("scenario header regex should be valid")
});
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*Description:\*\*\s*(.+)").expect("description regex should be valid")
});
static REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\*\*User Request:\*\*\s*"(.+?)""#).expect("request regex should be valid")
});
static PLATFORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*Platform:\*\*\s*(.+)").expect("platform regex should be valid")
});

const CRITERIA_LABEL: &str = "**Expected Criteria:**";

/// A test block that could not be turned into a [`TestCase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedScenario {
    /// 1-indexed line of the block header.
    pub line: usize,
    /// Header ordinal text as written.
    pub ordinal: String,
    pub reason: String,
}

impl std::fmt::Display for MalformedScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: test block {:?}: {}",
            self.line, self.ordinal, self.reason
        )
    }
}

/// Cases parsed from one document plus the blocks that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedScenario {
    pub cases: Vec<TestCase>,
    pub malformed: Vec<MalformedScenario>,
}

struct Block<'a> {
    line: usize,
    ordinal: &'a str,
    name: &'a str,
    body: Vec<&'a str>,
}

/// Parse a scenario document into test cases.
pub fn parse(source: &str) -> ParsedScenario {
    let mut parsed = ParsedScenario::default();
    let mut seen = BTreeSet::new();

    for block in split_blocks(source) {
        match parse_block(&block) {
            Ok(case) => {
                if !seen.insert(case.id) {
                    parsed.malformed.push(MalformedScenario {
                        line: block.line,
                        ordinal: block.ordinal.to_string(),
                        reason: format!("duplicate test id {}", case.id),
                    });
                    continue;
                }
                parsed.cases.push(case);
            }
            Err(reason) => parsed.malformed.push(MalformedScenario {
                line: block.line,
                ordinal: block.ordinal.to_string(),
                reason,
            }),
        }
    }

    parsed
}

fn split_blocks(source: &str) -> Vec<Block<'_>> {
    let mut blocks: Vec<Block<'_>> = Vec::new();
    for (index, line) in source.lines().enumerate() {
        if let Some(caps) = HEADER_RE.captures(line) {
            let ordinal = caps.get(1).map_or("", |m| m.as_str().trim());
            let name = caps.get(2).map_or("", |m| m.as_str().trim());
            blocks.push(Block {
                line: index + 1,
                ordinal,
                name,
                body: Vec::new(),
            });
            continue;
        }
        if let Some(block) = blocks.last_mut() {
            block.body.push(line);
        }
    }
    blocks
}

fn parse_block(block: &Block<'_>) -> Result<TestCase, String> {
    let id: u32 = block
        .ordinal
        .parse()
        .map_err(|_| format!("test ordinal {:?} is not a number", block.ordinal))?;

    let body = block.body.join("\n");
    let user_request = capture(&REQUEST_RE, &body)
        .filter(|request| !request.trim().is_empty())
        .ok_or_else(|| "missing quoted **User Request:** line".to_string())?;

    let description = capture(&DESCRIPTION_RE, &body).unwrap_or_default();
    let platform = capture(&PLATFORM_RE, &body)
        .map(|platform| platform.trim().to_string())
        .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());

    Ok(TestCase {
        id,
        name: block.name.to_string(),
        description,
        user_request,
        criteria: criteria_list(&block.body),
        platform,
    })
}

fn capture(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Collect the bullet run that directly follows the criteria label.
///
/// Blank lines between the label and the first bullet are allowed; the run
/// ends at the first line that is not a `- ` bullet.
fn criteria_list(body: &[&str]) -> Vec<String> {
    let Some(start) = body.iter().position(|line| line.contains(CRITERIA_LABEL)) else {
        return Vec::new();
    };
    body[start + 1..]
        .iter()
        .skip_while(|line| line.trim().is_empty())
        .map_while(|line| line.strip_prefix("- ").map(str::trim_end))
        .map(str::to_string)
        .collect()
}
