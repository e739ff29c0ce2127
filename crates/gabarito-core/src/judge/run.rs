use super::client::parse_judge_reply;
use super::prompt::build_user_prompt;
use super::JudgeClient;
use crate::errors::{JudgeError, ProviderError};
use crate::model::{JudgeRequest, JudgeResponse};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sleeps for `duration` unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Judges one request under the client's retry policy.
///
/// - parse failures and transient provider errors share `max_attempts`
/// - a rate limit costs no attempt: one cooldown, one retry, and a second
///   consecutive rate limit is terminal
/// - fatal provider errors return immediately
pub(crate) async fn judge_impl(
    client: &JudgeClient,
    req: &JudgeRequest,
    cancel: &CancellationToken,
) -> Result<JudgeResponse, JudgeError> {
    let task = req.task_id().to_string();
    let prompt = build_user_prompt(req);
    let policy = &client.policy;

    let mut attempts = 0u32;
    let mut rate_limited = false;

    loop {
        if cancel.is_cancelled() {
            return Err(JudgeError::Cancelled { task });
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(JudgeError::Cancelled { task }),
            _ = client.scheduler.wait_turn() => {}
        }

        debug!(task = %task, attempt = attempts + 1, "judge call");
        let err = match client.llm.complete(&client.system_prompt, &prompt).await {
            Ok(resp) => {
                rate_limited = false;
                attempts += 1;
                client.usage.record(resp.usage);
                match parse_judge_reply(&resp.text, req.criteria.len()) {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) if attempts >= policy.max_attempts => {
                        return Err(JudgeError::Parse {
                            task,
                            attempts,
                            message: e.to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(
                            task = %task,
                            attempt = attempts,
                            max_attempts = policy.max_attempts,
                            error = %e,
                            "judge output rejected, retrying"
                        );
                        continue;
                    }
                }
            }
            Err(err) => err,
        };

        match err {
            ProviderError::RateLimited { retry_after } => {
                if rate_limited {
                    return Err(JudgeError::Exhausted {
                        task,
                        attempts,
                        source: err,
                    });
                }
                rate_limited = true;
                let cooldown = retry_after
                    .map_or(policy.rate_limit_cooldown, |ra| ra.max(policy.rate_limit_cooldown));
                warn!(
                    task = %task,
                    cooldown_secs = cooldown.as_secs(),
                    "rate limited by judge provider, cooling down"
                );
                if !pause(cooldown, cancel).await {
                    return Err(JudgeError::Cancelled { task });
                }
            }
            err if err.is_fatal() => return Err(JudgeError::Fatal { task, source: err }),
            err => {
                rate_limited = false;
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(JudgeError::Exhausted {
                        task,
                        attempts,
                        source: err,
                    });
                }
                let backoff = policy.backoff(attempts);
                warn!(
                    task = %task,
                    error = %err,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient judge error, retrying"
                );
                if !pause(backoff, cancel).await {
                    return Err(JudgeError::Cancelled { task });
                }
            }
        }
    }
}
