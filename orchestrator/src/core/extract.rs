//! Command extraction from free-text agent responses.
//!
//! Strategies run in a fixed precedence and the first hit wins:
//!
//! 1. fenced code block lines starting with the command prefix
//! 2. inline backtick spans starting with the command prefix
//! 3. `Command:` labeled lines (case-insensitive)
//! 4. fenced code block lines starting with a setup/diagnostic command

use std::sync::LazyLock;

use regex::Regex;

use crate::core::rules::Rules;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:bash|sh)?\s*\n(.*?)\n```").expect("fence regex should be valid")
});
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)command:\s*`?([^`\n]+)`?").expect("label regex should be valid")
});

/// A named extraction strategy.
struct Strategy {
    name: &'static str,
    run: fn(&CommandExtractor, &str) -> Option<String>,
}

const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "fenced_block",
        run: CommandExtractor::from_fenced_blocks,
    },
    Strategy {
        name: "inline_span",
        run: CommandExtractor::from_inline_spans,
    },
    Strategy {
        name: "command_label",
        run: CommandExtractor::from_labels,
    },
    Strategy {
        name: "setup_block",
        run: CommandExtractor::from_setup_blocks,
    },
];

/// Extracts the single candidate command from an agent response.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    lead: String,
    token_re: Regex,
    inline_re: Regex,
    setup_commands: Vec<String>,
}

impl CommandExtractor {
    pub fn new(rules: &Rules) -> Self {
        let prefix = regex::escape(&rules.command_prefix);
        Self {
            lead: rules.command_lead(),
            token_re: Regex::new(&format!(r"{prefix}\s+"))
                .expect("escaped prefix forms a valid regex"),
            inline_re: Regex::new(&format!(r"`({prefix}\s+[^`]+)`"))
                .expect("escaped prefix forms a valid regex"),
            setup_commands: rules.setup_commands.clone(),
        }
    }

    /// Return the first command found, or `None` when every strategy misses.
    pub fn extract(&self, output: &str) -> Option<String> {
        STRATEGIES.iter().find_map(|strategy| {
            let found = (strategy.run)(self, output);
            if let Some(command) = &found {
                tracing::trace!(strategy = strategy.name, command = %command, "command extracted");
            }
            found
        })
    }

    fn from_fenced_blocks(&self, output: &str) -> Option<String> {
        fenced_blocks(output)
            .filter(|block| self.token_re.is_match(block))
            .find_map(|block| {
                block_lines(block)
                    .find(|line| line.starts_with(&self.lead))
                    .map(str::to_string)
            })
    }

    fn from_inline_spans(&self, output: &str) -> Option<String> {
        self.inline_re
            .captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn from_labels(&self, output: &str) -> Option<String> {
        LABEL_RE
            .captures_iter(output)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .find(|value| value.starts_with(&self.lead))
            .map(str::to_string)
    }

    fn from_setup_blocks(&self, output: &str) -> Option<String> {
        fenced_blocks(output).find_map(|block| {
            block_lines(block)
                .find(|line| {
                    self.setup_commands
                        .iter()
                        .any(|command| line.starts_with(command.as_str()))
                })
                .map(str::to_string)
        })
    }
}

fn fenced_blocks(output: &str) -> impl Iterator<Item = &str> {
    FENCE_RE
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn block_lines(block: &str) -> impl Iterator<Item = &str> {
    block.lines().map(str::trim).filter(|line| !line.is_empty())
}
