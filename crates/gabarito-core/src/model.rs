use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Levels handled by the judge (everything above multiple choice).
pub const JUDGE_LEVELS: std::ops::RangeInclusive<u8> = 2..=4;

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^L([1-4])_(\d{2,})$").expect("task id pattern compiles"))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task id '{0}': expected L{{1-4}}_NN")]
pub struct TaskIdError(pub String);

/// Task identifier `L{level}_{number}`, e.g. `L3_02`.
///
/// Ordering is by level, then number, then the raw text, so `L1_09 < L1_10 < L2_01`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    level: u8,
    number: u64,
    raw: String,
}

impl TaskId {
    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Summary bucket for this task (`"L1"`..`"L4"`).
    pub fn level_key(&self) -> String {
        format!("L{}", self.level)
    }

    pub fn needs_judge(&self) -> bool {
        JUDGE_LEVELS.contains(&self.level)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = task_id_pattern()
            .captures(s)
            .ok_or_else(|| TaskIdError(s.to_string()))?;
        let level = caps[1].parse().map_err(|_| TaskIdError(s.to_string()))?;
        let number = caps[2].parse().map_err(|_| TaskIdError(s.to_string()))?;
        Ok(Self {
            level,
            number,
            raw: s.to_string(),
        })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Binary outcome for one (response set, task) pair. Serialized as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Fail,
    Pass,
}

impl Verdict {
    pub fn from_bool(passed: bool) -> Self {
        if passed {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn is_pass(self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Verdict::Fail => 0,
            Verdict::Pass => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Verdict::Fail),
            1 => Some(Verdict::Pass),
            _ => None,
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(d)?;
        Verdict::from_u8(v)
            .ok_or_else(|| serde::de::Error::custom(format!("verdict must be 0 or 1, got {v}")))
    }
}

/// One entry of the answer key.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSpec {
    /// Level 1: a single letter A-D.
    MultipleChoice {
        question: String,
        answer: char,
        answer_value: serde_json::Value,
    },
    /// Levels 2-4: every criterion must be met.
    Criteria {
        level: u8,
        question: String,
        criteria: Vec<String>,
    },
}

impl TaskSpec {
    pub fn level(&self) -> u8 {
        match self {
            TaskSpec::MultipleChoice { .. } => 1,
            TaskSpec::Criteria { level, .. } => *level,
        }
    }

    pub fn question(&self) -> &str {
        match self {
            TaskSpec::MultipleChoice { question, .. } | TaskSpec::Criteria { question, .. } => {
                question
            }
        }
    }
}

/// The loaded answer key. Shared read-only across every response set of a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnswerKey {
    pub version: String,
    pub tasks: BTreeMap<TaskId, TaskSpec>,
}

impl AnswerKey {
    pub fn get(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Provenance block of a response file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

/// One model run: raw answers keyed by the (unvalidated) task id text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSet {
    pub metadata: RunMetadata,
    pub responses: BTreeMap<String, String>,
}

impl ResponseSet {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// Correlates a judge request with its originating (response set, task) pair.
///
/// Rendered as `{run_id}::{task_id}`; parsing splits at the last `::` because
/// task ids never contain it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId {
    pub run_id: String,
    pub task_id: TaskId,
}

impl CorrelationId {
    pub const SEPARATOR: &'static str = "::";

    pub fn new(run_id: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            run_id: run_id.into(),
            task_id,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (run_id, task) = s.rsplit_once(Self::SEPARATOR)?;
        if run_id.is_empty() {
            return None;
        }
        Some(Self {
            run_id: run_id.to_string(),
            task_id: task.parse().ok()?,
        })
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.run_id, Self::SEPARATOR, self.task_id)
    }
}

/// Unit of work for the judge.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeRequest {
    pub correlation: CorrelationId,
    pub question: String,
    pub criteria: Vec<String>,
    pub candidate: String,
}

impl JudgeRequest {
    pub fn task_id(&self) -> &TaskId {
        &self.correlation.task_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub met: bool,
    #[serde(default)]
    pub evidence: String,
}

/// Parsed judge reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResponse {
    /// Verdict as reported by the judge, before the local AND gate.
    pub reported: Verdict,
    pub criteria: Vec<CriterionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hallucination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

impl JudgeResponse {
    /// Pass iff the judge says so, every criterion is met and no fabricated fact was flagged.
    pub fn verdict(&self) -> Verdict {
        Verdict::from_bool(
            self.reported.is_pass()
                && self.criteria.iter().all(|c| c.met)
                && self.hallucination.is_none(),
        )
    }

    /// Short reason for a failing verdict.
    pub fn failure_reason(&self) -> String {
        if let Some(reason) = self.fail_reason.as_deref().filter(|r| !r.trim().is_empty()) {
            return reason.to_string();
        }
        if self.hallucination.is_some() {
            return "factual error".to_string();
        }
        let unmet: Vec<String> = self
            .criteria
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.met)
            .map(|(i, c)| format!("C{}", c.id.unwrap_or(i as u32 + 1)))
            .collect();
        if unmet.is_empty() {
            "judge verdict 0".to_string()
        } else {
            format!("unmet {}", unmet.join(", "))
        }
    }
}

/// Result of evaluating one in-scope task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Level 1, resolved locally.
    Choice {
        verdict: Verdict,
        given: String,
        expected: char,
    },
    /// Levels 2-4, graded by the judge.
    Judged(JudgeResponse),
    /// Could not be scored; excluded from every summary count.
    Inconclusive { reason: String },
}

impl TaskOutcome {
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        TaskOutcome::Inconclusive {
            reason: reason.into(),
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            TaskOutcome::Choice { verdict, .. } => Some(*verdict),
            TaskOutcome::Judged(resp) => Some(resp.verdict()),
            TaskOutcome::Inconclusive { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TaskId {
        s.parse().unwrap()
    }

    #[test]
    fn task_id_accepts_two_or_more_digits() {
        let id = tid("L3_02");
        assert_eq!(id.level(), 3);
        assert_eq!(id.level_key(), "L3");
        assert!(id.needs_judge());
        assert!("L1_123".parse::<TaskId>().is_ok());
    }

    #[test]
    fn task_id_rejects_malformed() {
        for bad in ["L5_01", "L1_1", "l1_01", "L1-01", "L1_01 ", "X1_01", ""] {
            assert!(bad.parse::<TaskId>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn task_ids_order_by_level_then_number() {
        let mut ids = vec![tid("L2_01"), tid("L1_10"), tid("L1_09")];
        ids.sort();
        let raw: Vec<&str> = ids.iter().map(TaskId::as_str).collect();
        assert_eq!(raw, vec!["L1_09", "L1_10", "L2_01"]);
    }

    #[test]
    fn correlation_id_splits_at_last_separator() {
        let cid = CorrelationId::parse("team::run-01::L4_07").unwrap();
        assert_eq!(cid.run_id, "team::run-01");
        assert_eq!(cid.task_id.as_str(), "L4_07");
        assert_eq!(cid.to_string(), "team::run-01::L4_07");
        assert!(CorrelationId::parse("::L4_07").is_none());
        assert!(CorrelationId::parse("run::L9_07").is_none());
    }

    #[test]
    fn verdict_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Verdict::Pass).unwrap(), "1");
        assert_eq!(serde_json::from_str::<Verdict>("0").unwrap(), Verdict::Fail);
        assert!(serde_json::from_str::<Verdict>("2").is_err());
    }

    #[test]
    fn judge_response_ands_all_criteria() {
        let resp = JudgeResponse {
            reported: Verdict::Pass,
            criteria: vec![
                CriterionResult {
                    id: Some(1),
                    met: true,
                    evidence: "ok".into(),
                },
                CriterionResult {
                    id: Some(2),
                    met: false,
                    evidence: "absent".into(),
                },
                CriterionResult {
                    id: Some(3),
                    met: true,
                    evidence: "ok".into(),
                },
            ],
            hallucination: None,
            fail_reason: None,
        };
        assert_eq!(resp.verdict(), Verdict::Fail);
        assert_eq!(resp.failure_reason(), "unmet C2");
    }

    #[test]
    fn hallucination_forces_failure() {
        let resp = JudgeResponse {
            reported: Verdict::Pass,
            criteria: vec![CriterionResult {
                id: None,
                met: true,
                evidence: String::new(),
            }],
            hallucination: Some("invented a 2019 benchmark".into()),
            fail_reason: None,
        };
        assert_eq!(resp.verdict(), Verdict::Fail);
        assert_eq!(resp.failure_reason(), "factual error");
    }
}
