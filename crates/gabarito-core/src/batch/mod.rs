//! Batch lifecycle: build -> submit -> poll -> reconcile.
//!
//! ```text
//! built -> submitted -> polling -> completed
//!                              \-> completed_with_errors
//!                              \-> failed     (provider failure, expiry, deadline)
//!                              \-> abandoned  (cancellation)
//! ```
//!
//! Every request ends with exactly one outcome. Anything that is not a
//! parseable judge reply becomes inconclusive, never verdict 0.

use crate::errors::{EvalError, ProviderError};
use crate::judge::{build_user_prompt, parse_judge_reply, JudgeUsage, DEFAULT_SYSTEM_PROMPT};
use crate::model::{CorrelationId, JudgeRequest, TaskOutcome};
use crate::providers::batch::{BatchBackend, BatchItem, BatchLine, RemoteBatch, RemoteStatus};
use crate::report::progress::{ProgressEvent, ProgressSink};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub poll_interval: Duration,
    /// Overall deadline measured from the start of polling.
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Built,
    Submitted,
    Polling,
    Completed,
    CompletedWithErrors,
    Failed { reason: String },
    Abandoned,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Built => "built",
            BatchState::Submitted => "submitted",
            BatchState::Polling => "polling",
            BatchState::Completed => "completed",
            BatchState::CompletedWithErrors => "completed_with_errors",
            BatchState::Failed { .. } => "failed",
            BatchState::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed
                | BatchState::CompletedWithErrors
                | BatchState::Failed { .. }
                | BatchState::Abandoned
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Failed { reason } => write!(f, "failed ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One submission covering every level 2-4 task of every response set.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub submission_id: Option<String>,
    requests: Vec<JudgeRequest>,
    state: BatchState,
    outcomes: BTreeMap<CorrelationId, TaskOutcome>,
    usage: JudgeUsage,
}

impl BatchJob {
    /// Duplicate correlation ids keep their first request.
    pub fn build(requests: Vec<JudgeRequest>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let requests = requests
            .into_iter()
            .filter(|r| seen.insert(r.correlation.clone()))
            .collect();
        Self {
            submission_id: None,
            requests,
            state: BatchState::Built,
            outcomes: BTreeMap::new(),
            usage: JudgeUsage::default(),
        }
    }

    pub fn requests(&self) -> &[JudgeRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    pub fn usage(&self) -> JudgeUsage {
        self.usage
    }

    pub fn outcome(&self, id: &CorrelationId) -> Option<&TaskOutcome> {
        self.outcomes.get(id)
    }

    pub fn outcomes(&self) -> &BTreeMap<CorrelationId, TaskOutcome> {
        &self.outcomes
    }

    pub fn lines(&self) -> Vec<BatchLine> {
        self.requests
            .iter()
            .map(|r| BatchLine {
                custom_id: r.correlation.to_string(),
                prompt: build_user_prompt(r),
            })
            .collect()
    }

    /// Stops tracking the job. The remote batch is left as is; every request
    /// becomes inconclusive.
    pub fn abandon(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!(submission = ?self.submission_id, requests = self.len(), "batch abandoned");
        self.mark_all_inconclusive("batch abandoned");
        self.state = BatchState::Abandoned;
    }

    fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(submission = ?self.submission_id, reason = %reason, "batch failed");
        self.mark_all_inconclusive(&format!("batch failed: {reason}"));
        self.state = BatchState::Failed { reason };
    }

    fn mark_all_inconclusive(&mut self, reason: &str) {
        self.outcomes = self
            .requests
            .iter()
            .map(|r| (r.correlation.clone(), TaskOutcome::inconclusive(reason)))
            .collect();
    }

    /// Replaces outcomes and usage with a reconciliation result.
    pub fn apply(&mut self, rec: Reconciliation) {
        self.state = rec.state();
        self.outcomes = rec.outcomes;
        self.usage = rec.usage;
    }
}

/// Outcome of matching result lines against the submitted requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub outcomes: BTreeMap<CorrelationId, TaskOutcome>,
    pub usage: JudgeUsage,
    pub scored: usize,
    pub failed: usize,
    /// Extra lines for an already seen correlation id; ignored.
    pub duplicates: usize,
    /// Lines whose custom id matches no request; ignored.
    pub unknown: usize,
}

impl Reconciliation {
    pub fn state(&self) -> BatchState {
        if self.failed == 0 {
            BatchState::Completed
        } else {
            BatchState::CompletedWithErrors
        }
    }
}

/// Maps result lines to outcomes by correlation id. Pure: the same input
/// always yields the same output, and only the first line per id counts.
pub fn reconcile(requests: &[JudgeRequest], items: &[BatchItem]) -> Reconciliation {
    let by_id: HashMap<String, &JudgeRequest> = requests
        .iter()
        .map(|r| (r.correlation.to_string(), r))
        .collect();

    let mut rec = Reconciliation {
        outcomes: BTreeMap::new(),
        usage: JudgeUsage::default(),
        scored: 0,
        failed: 0,
        duplicates: 0,
        unknown: 0,
    };

    for item in items {
        let Some(req) = by_id.get(&item.custom_id) else {
            rec.unknown += 1;
            continue;
        };
        if rec.outcomes.contains_key(&req.correlation) {
            rec.duplicates += 1;
            continue;
        }
        let outcome = match &item.result {
            Ok(resp) => {
                rec.usage.api_calls += 1;
                rec.usage.tokens.add(resp.usage);
                match parse_judge_reply(&resp.text, req.criteria.len()) {
                    Ok(parsed) => TaskOutcome::Judged(parsed),
                    Err(e) => TaskOutcome::inconclusive(format!("unusable judge output: {e}")),
                }
            }
            Err(msg) => TaskOutcome::inconclusive(format!("batch request failed: {msg}")),
        };
        rec.outcomes.insert(req.correlation.clone(), outcome);
    }

    for req in requests {
        rec.outcomes
            .entry(req.correlation.clone())
            .or_insert_with(|| TaskOutcome::inconclusive("no result in batch output"));
    }

    rec.failed = rec
        .outcomes
        .values()
        .filter(|o| o.verdict().is_none())
        .count();
    rec.scored = rec.outcomes.len() - rec.failed;
    rec
}

/// Drives a [`BatchJob`] through its lifecycle against a [`BatchBackend`].
pub struct BatchManager {
    backend: Arc<dyn BatchBackend>,
    config: BatchConfig,
    system_prompt: String,
}

impl BatchManager {
    pub fn new(backend: Arc<dyn BatchBackend>, config: BatchConfig) -> Self {
        Self {
            backend,
            config,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn submit(&self, job: &mut BatchJob) -> Result<(), ProviderError> {
        let lines = job.lines();
        let id = self.backend.submit(&self.system_prompt, &lines).await?;
        info!(submission = %id, requests = lines.len(), provider = self.backend.provider_name(), "batch submitted");
        job.submission_id = Some(id);
        job.state = BatchState::Submitted;
        Ok(())
    }

    /// Polls until the provider reports a terminal status.
    ///
    /// Returns the remote batch when it completed. Returns `None` when the job
    /// was failed or abandoned instead (provider failure, deadline,
    /// cancellation). Transient status errors are logged and polling goes on.
    pub async fn poll(
        &self,
        job: &mut BatchJob,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> Result<Option<RemoteBatch>, ProviderError> {
        let Some(batch_id) = job.submission_id.clone() else {
            debug!(state = %job.state, "poll called on a job that was never submitted");
            return Ok(None);
        };
        if job.state.is_terminal() {
            return Ok(None);
        }
        job.state = BatchState::Polling;

        let started = Instant::now();
        let deadline = started + self.config.timeout;

        loop {
            if cancel.is_cancelled() {
                job.abandon();
                return Ok(None);
            }

            match self.backend.status(&batch_id).await {
                Ok(remote) => {
                    if let Some(sink) = progress {
                        sink(&ProgressEvent::Batch {
                            status: remote.status.to_string(),
                            completed: remote.counts.completed,
                            failed: remote.counts.failed,
                            total: remote.counts.total,
                            elapsed_secs: started.elapsed().as_secs(),
                        });
                    }
                    match remote.status {
                        RemoteStatus::Completed => return Ok(Some(remote)),
                        RemoteStatus::Failed | RemoteStatus::Expired | RemoteStatus::Cancelled => {
                            job.fail(format!("provider reported status '{}'", remote.status));
                            return Ok(None);
                        }
                        _ => debug!(submission = %batch_id, status = %remote.status, "batch pending"),
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(submission = %batch_id, error = %e, "batch status check failed, will retry"),
            }

            let now = Instant::now();
            if now >= deadline {
                job.fail(format!(
                    "timed out after {}s",
                    self.config.timeout.as_secs()
                ));
                return Ok(None);
            }
            let wake = (now + self.config.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => {
                    job.abandon();
                    return Ok(None);
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Downloads results of a completed batch and reconciles them into `job`.
    pub async fn collect(&self, job: &mut BatchJob, remote: &RemoteBatch) -> Result<(), ProviderError> {
        let items = self.backend.fetch_results(remote).await?;
        let rec = reconcile(job.requests(), &items);
        if rec.duplicates > 0 || rec.unknown > 0 {
            warn!(
                duplicates = rec.duplicates,
                unknown = rec.unknown,
                "ignored batch result lines"
            );
        }
        info!(
            submission = %remote.id,
            scored = rec.scored,
            failed = rec.failed,
            "batch reconciled"
        );
        job.apply(rec);
        Ok(())
    }

    /// Full lifecycle. On success the job is terminal and holds one outcome
    /// per request. Transport failures mark the job failed and are returned.
    pub async fn run(
        &self,
        job: &mut BatchJob,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> Result<(), EvalError> {
        if job.is_empty() {
            job.state = BatchState::Completed;
            return Ok(());
        }
        if cancel.is_cancelled() {
            job.abandon();
            return Ok(());
        }

        if let Err(source) = self.submit(job).await {
            job.fail(format!("submission failed: {source}"));
            return Err(EvalError::Batch {
                stage: "submission",
                source,
            });
        }

        let remote = match self.poll(job, cancel, progress).await {
            Ok(Some(remote)) => remote,
            Ok(None) => return Ok(()),
            Err(source) => {
                job.fail(format!("polling failed: {source}"));
                return Err(EvalError::Batch {
                    stage: "polling",
                    source,
                });
            }
        };

        if let Err(source) = self.collect(job, &remote).await {
            job.fail(format!("result download failed: {source}"));
            return Err(EvalError::Batch {
                stage: "download",
                source,
            });
        }
        Ok(())
    }
}
