//! Heuristic grading of an agent response against declarative criteria.
//!
//! Grading is best-effort, not a grammar check. Platform gates and the
//! missing-command check short-circuit; everything after them appends to a
//! shared failure list so one verdict reports every problem found.
//!
//! Criterion checks live in [`CRITERION_CHECKS`] and run in order for every
//! criterion string. Adding a check never changes the precedence of the
//! existing ones.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::rules::Rules;
use crate::core::types::{TestCase, Verdict};

pub const ALL_CRITERIA_MET: &str = "All criteria met";
pub const NO_COMMAND_REASON: &str = "No command found in response";
pub const SETUP_TOO_SHORT: &str = "Response too short - appears incomplete";
pub const SETUP_OK: &str = "Setup test provided reasonable guidance";

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("backtick regex should be valid"));
static FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`(-[^\s`]+|--[^\s`]+)`").expect("flag regex should be valid")
});
static QUOTED_TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"query[^`]*`"([^"]+)"`"#).expect("quoted term regex should be valid")
});
static FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)format:\s*`([^`]+)`").expect("format regex should be valid")
});

/// Everything a criterion check may look at.
struct CheckInput<'a> {
    criterion: &'a str,
    criterion_lower: String,
    command: &'a str,
    command_lower: String,
    output: &'a str,
    validator: &'a Validator,
}

/// A named criterion matcher. Pushes failure descriptions, never removes them.
struct CriterionCheck {
    name: &'static str,
    check: fn(&CheckInput<'_>, &mut Vec<String>),
}

const CRITERION_CHECKS: &[CriterionCheck] = &[
    CriterionCheck {
        name: "search_subtype",
        check: check_search_subtype,
    },
    CriterionCheck {
        name: "flags",
        check: check_flags,
    },
    CriterionCheck {
        name: "quoted_term",
        check: check_quoted_term,
    },
    CriterionCheck {
        name: "separator",
        check: check_separator,
    },
    CriterionCheck {
        name: "expected_format",
        check: check_expected_format,
    },
];

/// Grades agent output for a test case. Pure: equal inputs give equal verdicts.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: Rules,
    search_command: String,
    subtype_re: Regex,
}

impl Validator {
    pub fn new(rules: &Rules) -> Self {
        let search_command = rules.search_command().to_lowercase();
        Self {
            subtype_re: Regex::new(&format!(r"{} (\w+)", regex::escape(&search_command)))
                .expect("escaped search command forms a valid regex"),
            search_command,
            rules: rules.clone(),
        }
    }

    /// Grade `output` (the agent's stdout) and the command extracted from it.
    pub fn validate(
        &self,
        group: &str,
        case: &TestCase,
        output: &str,
        command: Option<&str>,
    ) -> Verdict {
        if let Some(platform) = self
            .rules
            .skip_platforms
            .iter()
            .find(|platform| case.platform.contains(platform.as_str()))
        {
            return Verdict::skipped(format!("SKIPPED: {platform}-specific test"));
        }

        if self
            .rules
            .setup_platforms
            .iter()
            .any(|platform| case.platform.contains(platform.as_str()))
        {
            if output.chars().count() < self.rules.setup_min_output_chars {
                return Verdict::fail(SETUP_TOO_SHORT);
            }
            return Verdict::pass(SETUP_OK);
        }

        let Some(command) = command else {
            return Verdict::fail(NO_COMMAND_REASON);
        };

        let mut failures = Vec::new();
        self.check_search_group(group, command, &mut failures);

        let command_lower = command.to_lowercase();
        for criterion in &case.criteria {
            let input = CheckInput {
                criterion,
                criterion_lower: criterion.to_lowercase(),
                command,
                command_lower: command_lower.clone(),
                output,
                validator: self,
            };
            for rule in CRITERION_CHECKS {
                let before = failures.len();
                (rule.check)(&input, &mut failures);
                if failures.len() > before {
                    tracing::trace!(check = rule.name, criterion = %criterion, "criterion check failed");
                }
            }
        }

        if failures.is_empty() {
            Verdict::pass(ALL_CRITERIA_MET)
        } else {
            Verdict::fail(failures.join("; "))
        }
    }

    /// Search-flavored groups must use the search subcommand, not a listing family.
    fn check_search_group(&self, group: &str, command: &str, failures: &mut Vec<String>) {
        let search = self.rules.search_subcommand.to_lowercase();
        if !group.to_lowercase().contains(&search) {
            return;
        }
        let prefix = &self.rules.command_prefix;
        if let Some(family) = self
            .rules
            .disallowed_search_families
            .iter()
            .find(|family| command.starts_with(&format!("{prefix} {family} ")))
        {
            failures.push(format!(
                "Used `{prefix} {family}` instead of `{}` (skill not applied)",
                self.rules.search_command()
            ));
        }
    }
}

fn is_alternation(criterion_lower: &str) -> bool {
    criterion_lower.contains(" or ") || criterion_lower.contains("(both are valid)")
}

fn check_search_subtype(input: &CheckInput<'_>, failures: &mut Vec<String>) {
    let marker = format!("uses `{}", input.validator.search_command);
    if !input.criterion_lower.contains(&marker) {
        return;
    }
    if let Some(caps) = input.validator.subtype_re.captures(&input.criterion_lower) {
        let subtype = &caps[1];
        if !input.command_lower.contains(subtype) {
            failures.push(format!("Missing: {}", &caps[0]));
        }
    }
}

/// Required flags, alternations, and the combined-results alternation.
fn check_flags(input: &CheckInput<'_>, failures: &mut Vec<String>) {
    if !is_alternation(&input.criterion_lower) {
        if let Some(caps) = FLAG_RE.captures(input.criterion) {
            let flag = &caps[1];
            if !input.command.contains(flag) {
                failures.push(format!("Missing flag: {flag}"));
            }
        }
        return;
    }

    if is_combined_results_criterion(&input.criterion_lower) {
        check_combined_results(input, failures);
        return;
    }

    let alternatives: Vec<&str> = BACKTICK_RE
        .captures_iter(input.criterion)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();
    if alternatives.is_empty() {
        return;
    }
    let found = alternatives.iter().any(|alt| {
        if alt.contains(':') {
            input.command_lower.contains(&alt.to_lowercase())
        } else {
            input.command.contains(alt)
        }
    });
    if !found {
        let listed: Vec<String> = alternatives.iter().map(|alt| format!("`{alt}`")).collect();
        failures.push(format!("Missing one of: {}", listed.join(", ")));
    }
}

/// "Either uses `--include-prs` or separate commands" style criteria.
fn is_combined_results_criterion(criterion_lower: &str) -> bool {
    criterion_lower.contains("either uses")
        && criterion_lower.contains("include-prs")
        && criterion_lower.contains("separate commands")
}

/// Inspects the full output: the second command of a two-command answer is
/// never the extracted one.
fn check_combined_results(input: &CheckInput<'_>, failures: &mut Vec<String>) {
    let search = input.validator.rules.search_command();
    let has_flag = input.command.contains("--include-prs");
    let has_separate = input.output.contains(&format!("{search} issues"))
        && input.output.contains(&format!("{search} prs"));
    if !(has_flag || has_separate) {
        failures.push("Missing flag: --include-prs".to_string());
    }
}

fn check_quoted_term(input: &CheckInput<'_>, failures: &mut Vec<String>) {
    if !input.criterion_lower.contains("must be quoted") {
        return;
    }
    if let Some(caps) = QUOTED_TERM_RE.captures(&input.criterion_lower)
        && !input.command_lower.contains(&caps[1])
    {
        failures.push(format!("Query not properly formatted: {}", input.criterion));
    }
}

fn check_separator(input: &CheckInput<'_>, failures: &mut Vec<String>) {
    if input.criterion.trim().starts_with("Uses `--` flag") && !input.command.contains(" -- ") {
        failures.push("Missing `--` flag before query".to_string());
    }
}

/// Coarse format check: only the search subcommand token is compared.
fn check_expected_format(input: &CheckInput<'_>, failures: &mut Vec<String>) {
    if !input.criterion_lower.contains("format:") {
        return;
    }
    let search = input.validator.rules.search_subcommand.to_lowercase();
    if let Some(caps) = FORMAT_RE.captures(input.criterion) {
        let expected = caps[1].to_lowercase();
        if expected.contains(&search) && !input.command_lower.contains(&search) {
            failures.push("Does not match expected format".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestStatus;

    fn case(platform: &str, criteria: &[&str]) -> TestCase {
        TestCase {
            id: 1,
            name: "case".to_string(),
            description: String::new(),
            user_request: "find issues about memory leak".to_string(),
            criteria: criteria.iter().map(|c| c.to_string()).collect(),
            platform: platform.to_string(),
        }
    }

    fn validator() -> Validator {
        Validator::new(&Rules::default())
    }

    const GROUP: &str = "gh-search-issues-tests";

    #[test]
    fn search_group_passes_with_search_command() {
        let case = case("All", &["Uses `gh search issues`"]);
        let command = r#"gh search issues "memory leak""#;
        let verdict = validator().validate(GROUP, &case, command, Some(command));
        assert_eq!(verdict, Verdict::pass(ALL_CRITERIA_MET));
    }

    #[test]
    fn search_group_rejects_listing_family() {
        let case = case("All", &["Uses `gh search issues`"]);
        let command = r#"gh issue list --search "memory leak""#;
        let verdict = validator().validate(GROUP, &case, command, Some(command));
        assert_eq!(verdict.status, TestStatus::Fail);
        assert!(verdict.reason.contains("Used `gh issue` instead of `gh search`"));
    }

    #[test]
    fn listing_family_fails_even_when_criteria_hold() {
        let case = case("All", &["Includes `--state`"]);
        let command = "gh pr list --state open";
        let verdict = validator().validate("gh-search-prs-tests", &case, command, Some(command));
        assert_eq!(verdict.status, TestStatus::Fail);
        assert_eq!(
            verdict.reason,
            "Used `gh pr` instead of `gh search` (skill not applied)"
        );
    }

    #[test]
    fn listing_family_allowed_outside_search_groups() {
        let case = case("All", &[]);
        let command = "gh issue list";
        let verdict = validator().validate("gh-cli-setup-tests", &case, command, Some(command));
        assert!(verdict.passed());
    }

    #[test]
    fn missing_command_fails() {
        let case = case("All", &["Uses `gh search issues`"]);
        let verdict = validator().validate(GROUP, &case, "I cannot help", None);
        assert_eq!(verdict, Verdict::fail(NO_COMMAND_REASON));
    }

    #[test]
    fn skip_platform_is_skipped() {
        let case = case("Windows (PowerShell)", &[]);
        let verdict = validator().validate(GROUP, &case, "", None);
        assert_eq!(verdict.status, TestStatus::Skipped);
        assert!(verdict.passed());
        assert!(verdict.reason.starts_with("SKIPPED"));
    }

    #[test]
    fn setup_platform_checks_length_only() {
        let case = case("macOS", &["Uses `brew install gh`"]);
        let short = validator().validate("gh-cli-setup-tests", &case, "brew it.", None);
        assert_eq!(short, Verdict::fail(SETUP_TOO_SHORT));

        let long_output = "Install Homebrew first, then run brew install gh. ".repeat(10);
        let long = validator().validate("gh-cli-setup-tests", &case, &long_output, None);
        assert_eq!(long, Verdict::pass(SETUP_OK));
    }

    #[test]
    fn failures_accumulate_across_criteria() {
        let case = case(
            "All",
            &[
                "Uses `gh search prs`",
                "Includes `--state` flag",
                "Uses `--` flag before query",
            ],
        );
        let command = "gh search issues crash";
        let verdict = validator().validate(GROUP, &case, command, Some(command));
        assert_eq!(
            verdict.reason,
            "Missing: gh search prs; Missing flag: --state; Missing flag: --; Missing `--` flag before query"
        );
    }

    #[test]
    fn alternation_requires_one_alternative() {
        let case = case(
            "All",
            &["Uses `--state open` or `is:open` (both are valid)"],
        );
        let qualifier = "gh search issues IS:OPEN crash";
        assert!(validator().validate(GROUP, &case, qualifier, Some(qualifier)).passed());

        let flag = "gh search issues crash --state open";
        assert!(validator().validate(GROUP, &case, flag, Some(flag)).passed());

        let upper_flag = "gh search issues crash --STATE OPEN";
        let verdict = validator().validate(GROUP, &case, upper_flag, Some(upper_flag));
        assert_eq!(
            verdict.reason,
            "Missing one of: `--state open`, `is:open`"
        );
    }

    #[test]
    fn combined_results_inspects_full_output() {
        let case = case(
            "All",
            &["Either uses `--include-prs` or separate commands for issues and PRs"],
        );
        let output = "```bash\ngh search issues bug\ngh search prs bug\n```";
        let command = "gh search issues bug";
        assert!(validator().validate(GROUP, &case, output, Some(command)).passed());

        let verdict = validator().validate(GROUP, &case, command, Some(command));
        assert_eq!(verdict.reason, "Missing flag: --include-prs");
    }

    #[test]
    fn quoted_term_is_case_insensitive() {
        let case = case("All", &["Query `\"memory leak\"` must be quoted"]);
        let command = r#"gh search issues "Memory Leak""#;
        assert!(validator().validate(GROUP, &case, command, Some(command)).passed());

        let bare = "gh search issues memory";
        let verdict = validator().validate(GROUP, &case, bare, Some(bare));
        assert!(verdict.reason.starts_with("Query not properly formatted"));
    }

    #[test]
    fn expected_format_checks_search_token() {
        let case = case("All", &["Matches format: `gh search code <query>`"]);
        let command = "gh api search/code";
        assert!(validator().validate("misc", &case, command, Some(command)).passed());

        let other = "gh browse";
        let verdict = validator().validate("misc", &case, other, Some(other));
        assert_eq!(verdict.reason, "Does not match expected format");
    }

    #[test]
    fn validation_is_pure() {
        let case = case("All", &["Uses `gh search issues`", "Includes `--limit`"]);
        let command = "gh search issues x";
        let first = validator().validate(GROUP, &case, command, Some(command));
        let second = validator().validate(GROUP, &case, command, Some(command));
        assert_eq!(first, second);
    }
}
