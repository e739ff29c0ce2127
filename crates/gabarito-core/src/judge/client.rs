//! Parse boundary: judge reply text -> [`JudgeResponse`].
//!
//! The only leniency is locating the first JSON object in the reply. Field
//! aliases `overall_verdict` and `criteria_results` are accepted; everything
//! else must match the schema.

use crate::model::{CriterionResult, JudgeResponse, Verdict};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct JudgeParseError(pub String);

impl JudgeParseError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVerdict {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl RawVerdict {
    fn into_verdict(self) -> Result<Verdict, JudgeParseError> {
        match self {
            RawVerdict::Int(0) | RawVerdict::Bool(false) => Ok(Verdict::Fail),
            RawVerdict::Int(1) | RawVerdict::Bool(true) => Ok(Verdict::Pass),
            RawVerdict::Text(s) if s.trim() == "0" => Ok(Verdict::Fail),
            RawVerdict::Text(s) if s.trim() == "1" => Ok(Verdict::Pass),
            other => Err(JudgeParseError::new(format!(
                "verdict must be 0 or 1, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCriterionId {
    Num(u32),
    Text(String),
}

impl RawCriterionId {
    /// Accepts `2`, `"2"` and `"C2"`.
    fn number(&self) -> Option<u32> {
        match self {
            RawCriterionId::Num(n) => Some(*n),
            RawCriterionId::Text(s) => {
                let s = s.trim();
                s.strip_prefix(['C', 'c']).unwrap_or(s).parse().ok()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCriterion {
    #[serde(default)]
    id: Option<RawCriterionId>,
    met: bool,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(alias = "overall_verdict")]
    verdict: RawVerdict,
    #[serde(alias = "criteria_results")]
    criteria: Vec<RawCriterion>,
    #[serde(default)]
    hallucination: Value,
    #[serde(default)]
    fail_reason: Option<String>,
}

/// `null`, `false`, `""` and `"none"` mean no hallucination was flagged.
fn hallucination_note(value: Value) -> Result<Option<String>, JudgeParseError> {
    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some("flagged by judge".to_string())),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("none")
                || trimmed.eq_ignore_ascii_case("null")
            {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        other => Err(JudgeParseError::new(format!(
            "hallucination must be a string or null, got {other}"
        ))),
    }
}

/// Extracts the first JSON object from `text` and validates it against the
/// judge reply schema. `expected_criteria` is the number of criteria sent.
pub fn parse_judge_reply(
    text: &str,
    expected_criteria: usize,
) -> Result<JudgeResponse, JudgeParseError> {
    let text = text.trim();
    let start = text
        .find('{')
        .ok_or_else(|| JudgeParseError::new("no JSON object in judge output"))?;

    let value: Value = serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| JudgeParseError::new("no JSON object in judge output"))?
        .map_err(|e| JudgeParseError::new(format!("invalid JSON: {e}")))?;

    let raw: RawReply = serde_json::from_value(value)
        .map_err(|e| JudgeParseError::new(format!("reply does not match schema: {e}")))?;

    if raw.criteria.len() != expected_criteria {
        return Err(JudgeParseError::new(format!(
            "expected {expected_criteria} criteria results, got {}",
            raw.criteria.len()
        )));
    }

    let reported = raw.verdict.into_verdict()?;
    let hallucination = hallucination_note(raw.hallucination)?;
    let criteria = raw
        .criteria
        .into_iter()
        .map(|c| CriterionResult {
            id: c.id.as_ref().and_then(RawCriterionId::number),
            met: c.met,
            evidence: c.evidence.unwrap_or_default(),
        })
        .collect();

    Ok(JudgeResponse {
        reported,
        criteria,
        hallucination,
        fail_reason: raw.fail_reason.filter(|r| !r.trim().is_empty()),
    })
}
