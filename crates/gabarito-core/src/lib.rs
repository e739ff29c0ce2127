//! Judging orchestration engine.
//!
//! Grades free-text answers produced by language models against a structured
//! answer key ("gabarito"):
//!
//! - level-1 (multiple choice) tasks are resolved locally by [`matcher`]
//! - level-2..4 tasks are sent to an LLM judge, either one call at a time
//!   through [`judge::JudgeClient`] or as one asynchronous submission through
//!   [`batch::BatchManager`]
//! - per-task outcomes are folded into per-level summaries by [`aggregate`]
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `OPENAI_API_KEY` | Judge provider credential |
//! | `GABARITO_JUDGE_MODEL` | Judge model (default: `gpt-4o-mini`) |
//! | `GABARITO_MODE` | `standard`, `flex` or `batch` |
//! | `GABARITO_MIN_CALL_INTERVAL_MS` | Minimum spacing between direct calls |
//! | `GABARITO_RATE_LIMIT_COOLDOWN_SECS` | Pause after a rate-limit signal (default: 60) |
//! | `GABARITO_POLL_INTERVAL_SECS` | Batch status polling interval |
//! | `GABARITO_BATCH_TIMEOUT_SECS` | Overall batch deadline |
//! | `GABARITO_USD_TO_BRL` | Rate for the BRL cost estimate (default: 5.0) |

pub mod aggregate;
pub mod batch;
pub mod classify;
pub mod config;
pub mod cost;
pub mod engine;
pub mod errors;
pub mod judge;
pub mod load;
pub mod matcher;
pub mod model;
pub mod providers;
pub mod report;

pub use aggregate::{summarize, summarize_outcomes, LevelStats, Summary};
pub use batch::{BatchConfig, BatchJob, BatchManager, BatchState, Reconciliation};
pub use classify::{classify, Classification};
pub use config::{EvalConfig, JudgeMode};
pub use cost::CostSummary;
pub use engine::{BatchRun, DirectRun, Evaluator, RunResult};
pub use errors::{EvalError, JudgeError, LoadError, ProviderError, RunError, RunErrorKind};
pub use judge::{CallScheduler, JudgeClient, JudgeParseError, JudgeUsage, RetryPolicy};
pub use model::{
    AnswerKey, CorrelationId, CriterionResult, JudgeRequest, JudgeResponse, ResponseSet,
    RunMetadata, TaskId, TaskOutcome, TaskSpec, TokenUsage, Verdict,
};
pub use report::progress::{ProgressEvent, ProgressSink};
pub use report::{EvaluationReport, RunReport};
