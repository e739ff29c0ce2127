//! Direct-mode judge client.
//!
//! Responsibility boundaries:
//! - run.rs: retry / rate-limit / cancellation loop
//! - prompt.rs: prompt builders and constants only
//! - client.rs: reply parse boundary
//! - scheduler.rs: call spacing

mod client;
mod prompt;
mod run;
mod scheduler;

pub use client::{parse_judge_reply, JudgeParseError};
pub use prompt::{build_user_prompt, DEFAULT_SYSTEM_PROMPT};
pub use scheduler::CallScheduler;

use crate::errors::JudgeError;
use crate::model::{JudgeRequest, JudgeResponse, TokenUsage};
use crate::providers::llm::LlmClient;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts shared between parse failures and transient provider errors.
    pub max_attempts: u32,
    pub rate_limit_cooldown: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_cooldown: Duration::from_secs(60),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after the `attempt`-th failure, with 0.5-1.0x jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(self.max_backoff);
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        exp.mul_f64(factor)
    }
}

/// Provider usage accumulated across every call of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JudgeUsage {
    pub api_calls: u64,
    pub tokens: TokenUsage,
}

#[derive(Debug, Default)]
struct UsageMeter {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageMeter {
    fn record(&self, usage: TokenUsage) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    fn snapshot(&self) -> JudgeUsage {
        JudgeUsage {
            api_calls: self.calls.load(Ordering::Relaxed),
            tokens: TokenUsage {
                prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
                completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            },
        }
    }
}

pub struct JudgeClient {
    llm: Arc<dyn LlmClient>,
    scheduler: CallScheduler,
    policy: RetryPolicy,
    system_prompt: String,
    usage: UsageMeter,
}

impl JudgeClient {
    pub fn new(llm: Arc<dyn LlmClient>, scheduler: CallScheduler, policy: RetryPolicy) -> Self {
        Self {
            llm,
            scheduler,
            policy,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            usage: UsageMeter::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn usage(&self) -> JudgeUsage {
        self.usage.snapshot()
    }

    /// Judges one request. See `run.rs` for the retry contract.
    pub async fn judge(
        &self,
        req: &JudgeRequest,
        cancel: &CancellationToken,
    ) -> Result<JudgeResponse, JudgeError> {
        run::judge_impl(self, req, cancel).await
    }
}
