//! Per-response-set orchestration: classify, match level 1, judge the rest.

use crate::aggregate::{summarize_outcomes, Summary};
use crate::batch::{BatchJob, BatchManager};
use crate::classify::{classify, Classification};
use crate::errors::{EvalError, JudgeError};
use crate::judge::JudgeClient;
use crate::matcher::match_choice;
use crate::model::{
    AnswerKey, CorrelationId, JudgeRequest, ResponseSet, RunMetadata, TaskId, TaskOutcome,
    TaskSpec,
};
use crate::report::progress::{ProgressEvent, ProgressSink};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcomes of one response set.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub metadata: RunMetadata,
    /// Exactly the in-scope tasks: response ids that are also key ids.
    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
    pub warnings: Vec<String>,
}

impl RunResult {
    pub fn summary(&self) -> Summary {
        summarize_outcomes(&self.outcomes)
    }

    pub fn inconclusive(&self) -> impl Iterator<Item = (&TaskId, &str)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            TaskOutcome::Inconclusive { reason } => Some((id, reason.as_str())),
            _ => None,
        })
    }

    pub fn has_inconclusive(&self) -> bool {
        self.inconclusive().next().is_some()
    }
}

/// Result of a direct-mode evaluation of one response set.
#[derive(Debug)]
pub struct DirectRun {
    /// Every outcome recorded before `error`, if any, stopped the set.
    pub result: RunResult,
    pub error: Option<EvalError>,
}

impl DirectRun {
    fn completed(result: RunResult) -> Self {
        Self {
            result,
            error: None,
        }
    }

    /// The full result, or the error that cut it short.
    pub fn into_result(self) -> Result<RunResult, EvalError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result),
        }
    }
}

/// Result of a batch-mode session: per-set results plus the job that produced
/// their judge outcomes.
#[derive(Debug)]
pub struct BatchRun {
    pub results: Vec<RunResult>,
    pub job: BatchJob,
    /// Transport failure that ended the job early, if any.
    pub error: Option<EvalError>,
}

/// Level-1 outcomes resolved, judge work still pending.
struct Prepared {
    result: RunResult,
    requests: Vec<JudgeRequest>,
}

pub struct Evaluator {
    key: Arc<AnswerKey>,
    judge: Option<JudgeClient>,
}

impl Evaluator {
    pub fn new(key: Arc<AnswerKey>) -> Self {
        Self { key, judge: None }
    }

    pub fn with_judge(mut self, judge: JudgeClient) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn key(&self) -> &AnswerKey {
        &self.key
    }

    pub fn judge(&self) -> Option<&JudgeClient> {
        self.judge.as_ref()
    }

    /// True when any level 2-4 task of `set` is in scope.
    pub fn needs_judge(&self, set: &ResponseSet) -> bool {
        !classify(&self.key, set).judge_eval.is_empty()
    }

    fn prepare(&self, set: &ResponseSet) -> Prepared {
        let Classification {
            auto_eval,
            judge_eval,
            unknown,
        } = classify(&self.key, set);

        let mut warnings = Vec::new();
        for raw in &unknown {
            warn!(run = %set.id(), task = %raw, "unknown task ignored");
            warnings.push(format!("unknown task '{raw}' ignored"));
        }

        let mut outcomes = BTreeMap::new();
        for id in auto_eval {
            let (Some(TaskSpec::MultipleChoice { answer, .. }), Some(candidate)) =
                (self.key.get(&id), set.responses.get(id.as_str()))
            else {
                continue;
            };
            let m = match_choice(candidate, *answer);
            if let Some(w) = m.warning(&id) {
                warnings.push(w);
            }
            outcomes.insert(id, m.into_outcome(*answer));
        }

        let requests = judge_eval
            .into_iter()
            .filter_map(|id| {
                let Some(TaskSpec::Criteria {
                    question, criteria, ..
                }) = self.key.get(&id)
                else {
                    return None;
                };
                let candidate = set.responses.get(id.as_str())?;
                Some(JudgeRequest {
                    correlation: CorrelationId::new(set.id(), id),
                    question: question.clone(),
                    criteria: criteria.clone(),
                    candidate: candidate.clone(),
                })
            })
            .collect();

        Prepared {
            result: RunResult {
                run_id: set.id().to_string(),
                metadata: set.metadata.clone(),
                outcomes,
                warnings,
            },
            requests,
        }
    }

    /// Direct mode: level-1 matching, then one sequential judge call per task
    /// in task-id order.
    ///
    /// A judge parse failure makes the task inconclusive. Exhausted retries,
    /// fatal provider errors and cancellation stop the response set; the
    /// returned result then holds the outcomes recorded so far and the error
    /// names the task that was not judged.
    pub async fn evaluate_direct(
        &self,
        set: &ResponseSet,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> DirectRun {
        let Prepared {
            mut result,
            requests,
        } = self.prepare(set);

        let judge = match (&self.judge, requests.first()) {
            (_, None) => None,
            (Some(judge), Some(_)) => Some(judge),
            (None, Some(first)) => {
                let error = EvalError::JudgeUnavailable {
                    run: result.run_id.clone(),
                    task: first.task_id().to_string(),
                };
                return DirectRun {
                    result,
                    error: Some(error),
                };
            }
        };

        let total = result.outcomes.len() + requests.len();
        if let Some(sink) = progress {
            for (i, (id, outcome)) in result.outcomes.iter().enumerate() {
                sink(&ProgressEvent::Task {
                    done: i + 1,
                    total,
                    task: id.clone(),
                    verdict: outcome.verdict(),
                    judged: false,
                });
            }
        }

        let Some(judge) = judge else {
            return DirectRun::completed(result);
        };

        for req in requests {
            let outcome = match judge.judge(&req, cancel).await {
                Ok(resp) => TaskOutcome::Judged(resp),
                Err(JudgeError::Parse {
                    attempts, message, ..
                }) => {
                    warn!(run = %result.run_id, task = %req.task_id(), attempts, "judge output unusable");
                    TaskOutcome::inconclusive(format!(
                        "judge output unusable after {attempts} attempts: {message}"
                    ))
                }
                Err(source) => {
                    warn!(run = %result.run_id, task = %req.task_id(), recorded = result.outcomes.len(), "response set aborted");
                    let error = EvalError::Aborted {
                        run: result.run_id.clone(),
                        source,
                    };
                    return DirectRun {
                        result,
                        error: Some(error),
                    };
                }
            };
            debug!(run = %result.run_id, task = %req.task_id(), verdict = ?outcome.verdict(), "task judged");
            let id = req.correlation.task_id;
            if let Some(sink) = progress {
                sink(&ProgressEvent::Task {
                    done: result.outcomes.len() + 1,
                    total,
                    task: id.clone(),
                    verdict: outcome.verdict(),
                    judged: true,
                });
            }
            result.outcomes.insert(id, outcome);
        }

        DirectRun::completed(result)
    }

    /// Level-1 results for every set plus one job holding every judge request.
    ///
    /// Correlation ids are keyed by set id, so a set repeating an earlier id
    /// is skipped and noted as a warning on the first one.
    pub fn build_batch(&self, sets: &[ResponseSet]) -> (Vec<RunResult>, BatchJob) {
        let mut results: Vec<RunResult> = Vec::with_capacity(sets.len());
        let mut requests = Vec::new();
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for set in sets {
            if let Some(&first) = seen.get(set.id()) {
                warn!(run = %set.id(), "duplicate response set id, skipped");
                results[first]
                    .warnings
                    .push(format!("duplicate response set '{}' skipped", set.id()));
                continue;
            }
            seen.insert(set.id(), results.len());
            let prepared = self.prepare(set);
            results.push(prepared.result);
            requests.extend(prepared.requests);
        }
        (results, BatchJob::build(requests))
    }

    /// Batch mode: one submission for every response set, then per-set
    /// distribution of the reconciled outcomes by correlation id.
    pub async fn evaluate_batch(
        &self,
        sets: &[ResponseSet],
        manager: &BatchManager,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> BatchRun {
        let (mut results, mut job) = self.build_batch(sets);
        let error = manager.run(&mut job, cancel, progress).await.err();
        distribute(&mut results, &job);
        BatchRun {
            results,
            job,
            error,
        }
    }
}

/// Copies each request's outcome from `job` into its response set's result.
fn distribute(results: &mut [RunResult], job: &BatchJob) {
    let by_run: BTreeMap<String, usize> = results
        .iter()
        .enumerate()
        .map(|(i, r)| (r.run_id.clone(), i))
        .collect();
    for req in job.requests() {
        let Some(&index) = by_run.get(&req.correlation.run_id) else {
            continue;
        };
        let result = &mut results[index];
        let outcome = job
            .outcome(&req.correlation)
            .cloned()
            .unwrap_or_else(|| TaskOutcome::inconclusive("batch produced no outcome"));
        result
            .outcomes
            .insert(req.correlation.task_id.clone(), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Verdict;

    const KEY: &str = r#"{
        "version": "1.0",
        "L1_01": {"level": 1, "question": "q", "answer": "C", "answer_value": "x"},
        "L1_02": {"level": 1, "question": "q", "answer": "A", "answer_value": "y"},
        "L2_01": {"level": 2, "question": "q", "criteria": ["c1", "c2"]}
    }"#;

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(AnswerKey::from_json_str(KEY).unwrap()))
    }

    fn set(responses: &str) -> ResponseSet {
        ResponseSet::from_json_str(&format!(
            r#"{{"metadata": {{"id": "run-a"}}, "responses": {responses}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn level_one_only_needs_no_judge() {
        let result = evaluator()
            .evaluate_direct(
                &set(r#"{"L1_01": " c ", "L1_02": "C.", "L9_01": "?"}"#),
                &CancellationToken::new(),
                None,
            )
            .await
            .into_result()
            .unwrap();
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(
            result.outcomes[&"L1_01".parse().unwrap()].verdict(),
            Some(Verdict::Pass)
        );
        assert_eq!(
            result.outcomes[&"L1_02".parse().unwrap()].verdict(),
            Some(Verdict::Fail)
        );
        assert_eq!(result.warnings.len(), 2, "{:?}", result.warnings);
    }

    #[tokio::test]
    async fn judge_tasks_without_client_are_an_error() {
        let run = evaluator()
            .evaluate_direct(
                &set(r#"{"L1_01": "C", "L2_01": "text"}"#),
                &CancellationToken::new(),
                None,
            )
            .await;
        let err = run.error.expect("judge tasks need a client");
        assert!(matches!(err, EvalError::JudgeUnavailable { ref task, .. } if task == "L2_01"));
        assert!(err.is_session_fatal());
        let kept: Vec<&str> = run.result.outcomes.keys().map(TaskId::as_str).collect();
        assert_eq!(kept, vec!["L1_01"]);
    }

    #[test]
    fn batch_build_collects_judge_requests_across_sets() {
        let a = set(r#"{"L1_01": "C", "L2_01": "text"}"#);
        let mut b = set(r#"{"L2_01": "other"}"#);
        b.metadata.id = "run-b".into();
        let (results, job) = evaluator().build_batch(&[a, b]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcomes.len(), 1);
        assert!(results[1].outcomes.is_empty());
        let ids: Vec<String> = job.lines().into_iter().map(|l| l.custom_id).collect();
        assert_eq!(ids, vec!["run-a::L2_01", "run-b::L2_01"]);
    }

    #[test]
    fn batch_build_skips_repeated_set_ids() {
        let a = set(r#"{"L1_01": "C", "L2_01": "text"}"#);
        let again = set(r#"{"L1_01": "A", "L2_01": "other text"}"#);
        let (results, job) = evaluator().build_batch(&[a, again]);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].outcomes[&"L1_01".parse().unwrap()].verdict(),
            Some(Verdict::Pass)
        );
        assert!(results[0]
            .warnings
            .iter()
            .any(|w| w.contains("duplicate response set 'run-a'")));
        assert_eq!(job.len(), 1);
    }
}
