//! Decision payload parsing.
//!
//! The decision-maker answers with a JSON document, either the decision object
//! itself or an envelope whose string `result` field carries free text with the
//! decision object embedded in it. Anything that does not yield a schema-valid
//! decision becomes a forced HALT, never a RERUN.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{Decision, DecisionAction};

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

pub const NO_REASONING: &str = "No reasoning provided";
pub const UNKNOWN_CONFIDENCE: &str = "unknown";

static EMBEDDED_DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]*"action"[^{}]*\}"#).expect("decision regex should be valid")
});

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    action: DecisionAction,
    reasoning: Option<String>,
    confidence: Option<String>,
    #[serde(default, alias = "humanTasks")]
    human_tasks: Vec<String>,
}

impl From<DecisionPayload> for Decision {
    fn from(payload: DecisionPayload) -> Self {
        Self {
            action: payload.action,
            reasoning: payload
                .reasoning
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| NO_REASONING.to_string()),
            confidence: payload
                .confidence
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_CONFIDENCE.to_string()),
            human_tasks: payload.human_tasks,
        }
    }
}

/// Turn captured decision-maker stdout into a [`Decision`].
///
/// Never fails: an absent, unparseable or invalid payload yields
/// [`Decision::forced_halt`] with the parse error as reasoning.
pub fn parse_decision(stdout: &str) -> Decision {
    match try_parse_decision(stdout) {
        Ok(decision) => decision,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "decision payload rejected");
            Decision::forced_halt(format!("Invalid decision format from decision agent: {err:#}"))
        }
    }
}

fn try_parse_decision(stdout: &str) -> Result<Decision> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        bail!("decision output was empty");
    }

    let candidate = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => match value.get("result") {
            Some(Value::String(text)) => decision_from_text(text)?,
            Some(other) => bail!("envelope result is not text: {other}"),
            None => value,
        },
        Err(_) => decision_from_text(trimmed).context("parse decision output json")?,
    };

    validate_decision(&candidate)?;
    let payload: DecisionPayload =
        serde_json::from_value(candidate).context("decode decision payload")?;
    Ok(payload.into())
}

/// Find the decision object inside free text, falling back to parsing the
/// whole text as JSON.
fn decision_from_text(text: &str) -> Result<Value> {
    if let Some(found) = EMBEDDED_DECISION_RE.find(text) {
        return serde_json::from_str(found.as_str()).context("parse embedded decision object");
    }
    serde_json::from_str(text.trim()).map_err(|err| anyhow!("no decision object found: {err}"))
}

fn validate_decision(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(DECISION_SCHEMA).context("parse embedded decision schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile decision schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed: {}", messages.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_decision_object_is_parsed() {
        let decision = parse_decision(
            r#"{"action":"rerun","reasoning":"fix looks right","confidence":"high","human_tasks":["check token"]}"#,
        );
        assert_eq!(decision.action, DecisionAction::Rerun);
        assert_eq!(decision.reasoning, "fix looks right");
        assert_eq!(decision.confidence, "high");
        assert_eq!(decision.human_tasks, vec!["check token".to_string()]);
    }

    #[test]
    fn envelope_result_text_is_searched() {
        let stdout = serde_json::json!({
            "type": "result",
            "result": "After review:\n```json\n{\"action\": \"halt\", \"reasoning\": \"needs a human\", \"confidence\": \"medium\"}\n```\nDone.",
        })
        .to_string();
        let decision = parse_decision(&stdout);
        assert_eq!(decision.action, DecisionAction::Halt);
        assert_eq!(decision.reasoning, "needs a human");
        assert_eq!(decision.confidence, "medium");
    }

    #[test]
    fn camel_case_human_tasks_alias_is_accepted() {
        let decision =
            parse_decision(r#"{"action":"halt","humanTasks":["rotate credentials","file bug"]}"#);
        assert_eq!(decision.human_tasks.len(), 2);
        assert_eq!(decision.reasoning, NO_REASONING);
        assert_eq!(decision.confidence, UNKNOWN_CONFIDENCE);
    }

    #[test]
    fn missing_action_forces_halt() {
        let decision = parse_decision(r#"{"reasoning":"looks good","confidence":"high"}"#);
        assert_eq!(decision.action, DecisionAction::Halt);
        assert_eq!(decision.confidence, "low");
        assert!(decision.reasoning.contains("Invalid decision format"));
    }

    #[test]
    fn unknown_action_forces_halt() {
        let decision = parse_decision(r#"{"action":"continue","reasoning":"why not"}"#);
        assert_eq!(decision.action, DecisionAction::Halt);
        assert_eq!(decision.confidence, "low");
    }

    #[test]
    fn uppercase_action_is_not_recognized() {
        let decision = parse_decision(r#"{"action":"RERUN"}"#);
        assert_eq!(decision.action, DecisionAction::Halt);
    }

    #[test]
    fn garbage_and_empty_output_force_halt() {
        for stdout in ["", "   \n", "I think we should rerun the tests.", "{not json"] {
            let decision = parse_decision(stdout);
            assert_eq!(decision.action, DecisionAction::Halt, "stdout: {stdout:?}");
            assert_eq!(decision.confidence, "low");
        }
    }

    #[test]
    fn envelope_without_decision_forces_halt() {
        let stdout = r#"{"result":"I could not decide."}"#;
        assert_eq!(parse_decision(stdout).action, DecisionAction::Halt);
    }

    #[test]
    fn non_text_envelope_result_forces_halt() {
        let decision = parse_decision(r#"{"result": 5, "action": "rerun", "reasoning": "go"}"#);
        assert_eq!(decision.action, DecisionAction::Halt);
        assert_eq!(decision.confidence, "low");
        assert!(decision.reasoning.contains("envelope result is not text"));
    }

    #[test]
    fn wrong_field_types_force_halt() {
        let decision = parse_decision(r#"{"action":"rerun","human_tasks":"one task"}"#);
        assert_eq!(decision.action, DecisionAction::Halt);
    }
}
