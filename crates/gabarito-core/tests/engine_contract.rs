//! End-to-end grading properties through the public engine API, with scripted
//! judge and batch providers standing in for the network.

use async_trait::async_trait;
use gabarito_core::batch::{BatchConfig, BatchManager, BatchState};
use gabarito_core::providers::batch::{
    BatchBackend, BatchItem, BatchLine, RemoteBatch, RemoteStatus, RequestCounts,
};
use gabarito_core::providers::llm::{LlmClient, LlmResponse};
use gabarito_core::report::json::{read_json, report_path, write_json};
use gabarito_core::{
    AnswerKey, CallScheduler, EvalError, EvaluationReport, Evaluator, JudgeClient, JudgeError,
    JudgeMode, ProviderError, ResponseSet, RetryPolicy, TaskId, TokenUsage, Verdict,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const KEY: &str = r#"{
    "version": "2.1",
    "L1_01": {"level": 1, "question": "Capital?", "answer": "C", "answer_value": "Lisbon"},
    "L1_02": {"level": 1, "question": "Largest?", "answer": "A", "answer_value": 42},
    "L3_01": {"level": 3, "question": "Explain X", "criteria": ["defines X", "gives example", "cites source"]},
    "L4_01": {"level": 4, "question": "Design Y", "criteria": ["names tradeoff"]}
}"#;

fn key() -> Arc<AnswerKey> {
    Arc::new(AnswerKey::from_json_str(KEY).unwrap())
}

fn set(id: &str, responses: &str) -> ResponseSet {
    ResponseSet::from_json_str(&format!(
        r#"{{"metadata": {{"id": "{id}", "model": "model-{id}"}}, "responses": {responses}}}"#
    ))
    .unwrap()
}

fn tid(s: &str) -> TaskId {
    s.parse().unwrap()
}

fn reply(verdict: u8, met: &[bool]) -> String {
    let criteria: Vec<String> = met
        .iter()
        .enumerate()
        .map(|(i, m)| format!(r#"{{"id": {}, "met": {m}, "evidence": "e{}"}}"#, i + 1, i + 1))
        .collect();
    format!(
        r#"{{"verdict": {verdict}, "criteria": [{}], "hallucination": null}}"#,
        criteria.join(", ")
    )
}

struct ScriptedJudge {
    responses: Mutex<Vec<Result<String, ProviderError>>>,
}

impl ScriptedJudge {
    fn new(responses: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedJudge {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<LlmResponse, ProviderError> {
        let mut resps = self.responses.lock().unwrap();
        assert!(!resps.is_empty(), "judge called more often than scripted");
        resps.remove(0).map(|text| LlmResponse {
            text,
            model: "scripted".into(),
            usage: TokenUsage {
                prompt_tokens: 200,
                completion_tokens: 40,
            },
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn evaluator_with(judge: Arc<ScriptedJudge>) -> Evaluator {
    Evaluator::new(key()).with_judge(JudgeClient::new(
        judge,
        CallScheduler::unthrottled(),
        RetryPolicy::default(),
    ))
}

#[tokio::test]
async fn multiple_choice_is_trimmed_and_case_folded_only() {
    let result = Evaluator::new(key())
        .evaluate_direct(
            &set("run-a", r#"{"L1_01": "c", "L1_02": "A."}"#),
            &CancellationToken::new(),
            None,
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(result.outcomes[&tid("L1_01")].verdict(), Some(Verdict::Pass));
    assert_eq!(result.outcomes[&tid("L1_02")].verdict(), Some(Verdict::Fail));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("L1_02") && w.contains("A.")));
}

#[tokio::test]
async fn one_unmet_criterion_fails_the_task_even_if_judge_says_pass() {
    let judge = ScriptedJudge::new(vec![Ok(reply(1, &[true, false, true]))]);
    let result = evaluator_with(judge)
        .evaluate_direct(
            &set("run-a", r#"{"L3_01": "X is a thing"}"#),
            &CancellationToken::new(),
            None,
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(result.outcomes[&tid("L3_01")].verdict(), Some(Verdict::Fail));
}

#[tokio::test]
async fn scope_is_the_intersection_and_summary_lists_only_present_levels() {
    let judge = ScriptedJudge::new(vec![
        Ok(reply(1, &[true, true, true])),
        Ok(reply(0, &[false])),
    ]);
    let result = evaluator_with(judge)
        .evaluate_direct(
            &set("run-a", r#"{"L3_01": "a", "L4_01": "b", "L2_99": "stray"}"#),
            &CancellationToken::new(),
            None,
        )
        .await
        .into_result()
        .unwrap();

    let tasks: Vec<&str> = result.outcomes.keys().map(TaskId::as_str).collect();
    assert_eq!(tasks, vec!["L3_01", "L4_01"]);

    let summary = result.summary();
    let levels: Vec<&str> = summary.levels.keys().map(String::as_str).collect();
    assert_eq!(levels, vec!["L3", "L4"]);
    assert_eq!(summary.overall.evaluated, 2);
    assert_eq!(summary.overall.success, 1);
    assert_eq!(summary.overall.rate, 0.5);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_for_the_cooldown_before_retrying() {
    let judge = ScriptedJudge::new(vec![
        Err(ProviderError::RateLimited { retry_after: None }),
        Ok(reply(1, &[true])),
    ]);
    let started = Instant::now();
    let result = evaluator_with(judge)
        .evaluate_direct(
            &set("run-a", r#"{"L4_01": "tradeoff: latency"}"#),
            &CancellationToken::new(),
            None,
        )
        .await
        .into_result()
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(result.outcomes[&tid("L4_01")].verdict(), Some(Verdict::Pass));
}

#[tokio::test]
async fn unparseable_judge_output_leaves_the_task_inconclusive() {
    let judge = ScriptedJudge::new(vec![
        Ok("not json".into()),
        Ok(r#"{"verdict": 1}"#.into()),
        Ok("```\n{\"verdict\": 2}\n```".into()),
        Ok(reply(1, &[true])),
    ]);
    let result = evaluator_with(judge)
        .evaluate_direct(
            &set("run-a", r#"{"L1_01": "C", "L3_01": "X is", "L4_01": "tradeoff"}"#),
            &CancellationToken::new(),
            None,
        )
        .await
        .into_result()
        .unwrap();

    assert!(result.outcomes[&tid("L3_01")].verdict().is_none());
    assert_eq!(result.outcomes[&tid("L4_01")].verdict(), Some(Verdict::Pass));

    let mut report = EvaluationReport::new("2.1", "scripted", JudgeMode::Standard);
    report.add_result(&result);
    let json = serde_json::to_value(&report).unwrap();
    let run = &json["results"]["run-a"];
    assert!(run["tasks"]["L3_01"].is_null());
    assert!(run["inconclusive"]["L3_01"]
        .as_str()
        .unwrap()
        .contains("after 3 attempts"));
    assert_eq!(run["summary"]["overall"]["evaluated"], 2);
    assert_eq!(run["summary"]["overall"]["success"], 2);
    assert!(run["summary"].get("L3").is_none());
}

#[tokio::test(start_paused = true)]
async fn abort_keeps_the_verdicts_recorded_before_it() {
    let key = Arc::new(
        AnswerKey::from_json_str(
            r#"{
                "L1_01": {"level": 1, "question": "q", "answer": "B", "answer_value": 2},
                "L2_01": {"level": 2, "question": "q", "criteria": ["c"]},
                "L2_02": {"level": 2, "question": "q", "criteria": ["c"]}
            }"#,
        )
        .unwrap(),
    );
    let unavailable = || {
        Err(ProviderError::Server {
            status: 503,
            message: "overloaded".into(),
        })
    };
    let judge = ScriptedJudge::new(vec![
        Ok(reply(1, &[true])),
        unavailable(),
        unavailable(),
        unavailable(),
    ]);
    let evaluator = Evaluator::new(key).with_judge(JudgeClient::new(
        judge,
        CallScheduler::unthrottled(),
        RetryPolicy::default(),
    ));

    let run = evaluator
        .evaluate_direct(
            &set("run-a", r#"{"L1_01": "b", "L2_01": "one", "L2_02": "two"}"#),
            &CancellationToken::new(),
            None,
        )
        .await;

    let err = run.error.expect("three 503s exhaust the attempts");
    assert!(matches!(
        &err,
        EvalError::Aborted { run: id, source: JudgeError::Exhausted { task, attempts: 3, .. } }
            if id == "run-a" && task == "L2_02"
    ));
    assert!(!err.is_session_fatal());
    assert!(err.to_string().contains("aborted at L2_02"));

    let kept: Vec<&str> = run.result.outcomes.keys().map(TaskId::as_str).collect();
    assert_eq!(kept, vec!["L1_01", "L2_01"]);
    assert_eq!(run.result.outcomes[&tid("L1_01")].verdict(), Some(Verdict::Pass));
    assert_eq!(run.result.outcomes[&tid("L2_01")].verdict(), Some(Verdict::Pass));
    assert_eq!(run.result.summary().overall.evaluated, 2);
}

/// Completes on the second status check; answers every submitted line except
/// the ones listed in `failing`.
struct ScriptedBatch {
    submitted: Mutex<Vec<BatchLine>>,
    polls: Mutex<u32>,
    failing: HashSet<String>,
}

#[async_trait]
impl BatchBackend for ScriptedBatch {
    async fn submit(&self, _system: &str, lines: &[BatchLine]) -> Result<String, ProviderError> {
        self.submitted.lock().unwrap().extend_from_slice(lines);
        Ok("batch_contract".into())
    }

    async fn status(&self, batch_id: &str) -> Result<RemoteBatch, ProviderError> {
        let mut polls = self.polls.lock().unwrap();
        *polls += 1;
        let status = if *polls < 2 {
            RemoteStatus::InProgress
        } else {
            RemoteStatus::Completed
        };
        Ok(RemoteBatch {
            id: batch_id.to_string(),
            status,
            output_file_id: Some("file-out".into()),
            error_file_id: Some("file-err".into()),
            counts: RequestCounts::default(),
        })
    }

    async fn fetch_results(&self, _batch: &RemoteBatch) -> Result<Vec<BatchItem>, ProviderError> {
        let lines = self.submitted.lock().unwrap();
        Ok(lines
            .iter()
            .map(|line| BatchItem {
                custom_id: line.custom_id.clone(),
                result: if self.failing.contains(&line.custom_id) {
                    Err("status 500: server error".into())
                } else {
                    Ok(LlmResponse {
                        text: reply(1, &[true]),
                        model: "scripted".into(),
                        usage: TokenUsage {
                            prompt_tokens: 100,
                            completion_tokens: 10,
                        },
                    })
                },
            })
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

const SINGLE_CRITERION_KEY: &str = r#"{
    "version": "1",
    "L2_01": {"level": 2, "question": "q", "criteria": ["c"]},
    "L2_02": {"level": 2, "question": "q", "criteria": ["c"]},
    "L3_01": {"level": 3, "question": "q", "criteria": ["c"]},
    "L3_02": {"level": 3, "question": "q", "criteria": ["c"]},
    "L4_01": {"level": 4, "question": "q", "criteria": ["c"]}
}"#;

#[tokio::test(start_paused = true)]
async fn batch_with_two_failed_lines_scores_eight_and_reaggregates_identically() {
    let responses =
        r#"{"L2_01": "a", "L2_02": "b", "L3_01": "c", "L3_02": "d", "L4_01": "e"}"#;
    let sets = vec![set("run-a", responses), set("run-b", responses)];
    let backend = Arc::new(ScriptedBatch {
        submitted: Mutex::new(Vec::new()),
        polls: Mutex::new(0),
        failing: ["run-a::L3_02", "run-b::L2_01"]
            .into_iter()
            .map(String::from)
            .collect(),
    });
    let manager = BatchManager::new(
        backend.clone(),
        BatchConfig {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(3600),
        },
    );
    let evaluator = Evaluator::new(Arc::new(
        AnswerKey::from_json_str(SINGLE_CRITERION_KEY).unwrap(),
    ));

    let run = evaluator
        .evaluate_batch(&sets, &manager, &CancellationToken::new(), None)
        .await;
    assert!(run.error.is_none());
    assert_eq!(backend.submitted.lock().unwrap().len(), 10);
    assert_eq!(*run.job.state(), BatchState::CompletedWithErrors);
    assert_eq!(run.job.usage().api_calls, 8);

    let scored: usize = run
        .results
        .iter()
        .map(|r| r.outcomes.values().filter(|o| o.verdict().is_some()).count())
        .sum();
    assert_eq!(scored, 8);
    let a = &run.results[0];
    assert_eq!(a.run_id, "run-a");
    assert!(a.outcomes[&tid("L3_02")].verdict().is_none());
    assert_eq!(a.summary().overall.evaluated, 4);

    let mut report = EvaluationReport::new("1", "scripted", JudgeMode::Batch);
    for result in &run.results {
        report.add_result(result);
    }
    let dir = tempfile::tempdir().unwrap();
    let path = report_path(dir.path(), "contract");
    write_json(&report, &path).unwrap();
    let back = read_json(&path).unwrap();
    for (id, summary) in back.resummarize() {
        assert_eq!(
            serde_json::to_string(&summary).unwrap(),
            serde_json::to_string(&back.results[&id].summary).unwrap()
        );
    }
}
