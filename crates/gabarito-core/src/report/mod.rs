pub mod console;
pub mod json;
pub mod justification;
pub mod progress;

use crate::aggregate::{summarize, Summary};
use crate::config::JudgeMode;
use crate::cost::CostSummary;
use crate::engine::RunResult;
use crate::model::{TaskId, TaskOutcome, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per response set section of the evaluation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// `null` marks an inconclusive task.
    pub tasks: BTreeMap<TaskId, Option<Verdict>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inconclusive: BTreeMap<TaskId, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub summary: Summary,
}

impl RunReport {
    pub fn from_result(result: &RunResult) -> Self {
        let tasks = result
            .outcomes
            .iter()
            .map(|(id, o)| (id.clone(), o.verdict()))
            .collect();
        let inconclusive = result
            .outcomes
            .iter()
            .filter_map(|(id, o)| match o {
                TaskOutcome::Inconclusive { reason } => Some((id.clone(), reason.clone())),
                _ => None,
            })
            .collect();
        Self {
            model: result.metadata.model.clone(),
            tasks,
            inconclusive,
            warnings: result.warnings.clone(),
            summary: result.summary(),
        }
    }

    /// Summary recomputed from `tasks` alone.
    pub fn resummarize(&self) -> Summary {
        summarize(self.tasks.iter().map(|(id, v)| (id, *v)))
    }
}

/// The JSON evaluation report written once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub eval_timestamp: String,
    pub gabarito_version: String,
    pub judge_model: String,
    pub judge_mode: JudgeMode,
    /// Ids of the response sets present in `results`, in evaluation order.
    pub files_evaluated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_summary: Option<CostSummary>,
    pub results: BTreeMap<String, RunReport>,
    /// File -> error, for files that failed to load or whose evaluation aborted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_files: BTreeMap<String, String>,
}

impl EvaluationReport {
    pub fn new(gabarito_version: &str, judge_model: &str, judge_mode: JudgeMode) -> Self {
        Self {
            eval_timestamp: chrono::Local::now().to_rfc3339(),
            gabarito_version: gabarito_version.to_string(),
            judge_model: judge_model.to_string(),
            judge_mode,
            files_evaluated: Vec::new(),
            cost_summary: None,
            results: BTreeMap::new(),
            failed_files: BTreeMap::new(),
        }
    }

    pub fn add_result(&mut self, result: &RunResult) {
        let previous = self
            .results
            .insert(result.run_id.clone(), RunReport::from_result(result));
        if previous.is_none() {
            self.files_evaluated.push(result.run_id.clone());
        }
    }

    pub fn add_failure(&mut self, file: impl Into<String>, error: impl Into<String>) {
        self.failed_files.insert(file.into(), error.into());
    }

    pub fn has_inconclusive(&self) -> bool {
        self.results.values().any(|r| !r.inconclusive.is_empty())
    }

    /// True when every file loaded and every task got a verdict.
    pub fn is_clean(&self) -> bool {
        self.failed_files.is_empty() && !self.has_inconclusive()
    }

    /// Per-set summaries recomputed from the recorded verdicts.
    pub fn resummarize(&self) -> BTreeMap<String, Summary> {
        self.results
            .iter()
            .map(|(id, r)| (id.clone(), r.resummarize()))
            .collect()
    }
}
