use std::time::Duration;

/// Failure to read or validate an input file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

impl LoadError {
    pub(crate) fn invalid(path: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a judge provider (chat or batch endpoint).
///
/// Classification drives retry policy: see [`ProviderError::is_transient`] and
/// [`ProviderError::is_fatal`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider request timed out: {message}")]
    Timeout { message: String },

    #[error("provider server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("provider rejected request (status {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("provider quota exhausted: {message}")]
    QuotaExhausted { message: String },

    #[error("invalid provider response: {message}")]
    InvalidResponse { message: String },
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Timeouts, 5xx, connection trouble and garbled envelopes: worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Server { .. }
                | Self::Network { .. }
                | Self::InvalidResponse { .. }
        )
    }

    /// Auth, malformed request, quota: retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::InvalidRequest { .. } | Self::QuotaExhausted { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Terminal outcome of judging one request in direct mode.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    /// Judge output never matched the reply schema. Task-level: the task is
    /// reported inconclusive and evaluation continues.
    #[error("judge output for {task} unusable after {attempts} attempts: {message}")]
    Parse {
        task: String,
        attempts: u32,
        message: String,
    },

    #[error("giving up on {task} after {attempts} attempts: {source}")]
    Exhausted {
        task: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("fatal provider error while judging {task}: {source}")]
    Fatal {
        task: String,
        #[source]
        source: ProviderError,
    },

    #[error("cancelled before judging {task}")]
    Cancelled { task: String },
}

impl JudgeError {
    pub fn task(&self) -> &str {
        match self {
            Self::Parse { task, .. }
            | Self::Exhausted { task, .. }
            | Self::Fatal { task, .. }
            | Self::Cancelled { task } => task,
        }
    }
}

/// Engine-level failure for a response set or a batch submission.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(
        "response set '{run}' needs the judge for {task}, but no judge client is configured \
         (set OPENAI_API_KEY or pass --api-key)"
    )]
    JudgeUnavailable { run: String, task: String },

    #[error("evaluation of '{run}' aborted at {}: {source}", .source.task())]
    Aborted {
        run: String,
        #[source]
        source: JudgeError,
    },

    #[error("batch {stage} failed: {source}")]
    Batch {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl EvalError {
    /// True when continuing with the next response set is pointless.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::JudgeUnavailable { .. } => true,
            Self::Aborted { source, .. } => matches!(source, JudgeError::Fatal { .. }),
            Self::Batch { source, .. } => source.is_fatal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    AnswerKey,
    ResponseFile,
    JudgeUnavailable,
    JudgeParse,
    ProviderRateLimit,
    ProviderTimeout,
    ProviderServer,
    ProviderAuth,
    ProviderRequest,
    ProviderQuota,
    Network,
    BatchFailed,
    Cancelled,
    Other,
}

impl RunErrorKind {
    /// Stable identifier written to reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnswerKey => "answer_key",
            Self::ResponseFile => "response_file",
            Self::JudgeUnavailable => "judge_unavailable",
            Self::JudgeParse => "judge_parse",
            Self::ProviderRateLimit => "provider_rate_limit",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderServer => "provider_server",
            Self::ProviderAuth => "provider_auth",
            Self::ProviderRequest => "provider_request",
            Self::ProviderQuota => "provider_quota",
            Self::Network => "network",
            Self::BatchFailed => "batch_failed",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }

    pub fn from_provider(err: &ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { .. } => Self::ProviderRateLimit,
            ProviderError::Timeout { .. } => Self::ProviderTimeout,
            ProviderError::Server { .. } | ProviderError::InvalidResponse { .. } => {
                Self::ProviderServer
            }
            ProviderError::Network { .. } => Self::Network,
            ProviderError::Unauthorized { .. } => Self::ProviderAuth,
            ProviderError::InvalidRequest { .. } => Self::ProviderRequest,
            ProviderError::QuotaExhausted { .. } => Self::ProviderQuota,
        }
    }
}

/// Flattened, report-friendly error record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
    pub path: Option<String>,
    pub task: Option<String>,
    pub status: Option<u16>,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            task: None,
            status: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn answer_key(err: &LoadError) -> Self {
        Self::from_load(RunErrorKind::AnswerKey, err)
    }

    pub fn response_file(err: &LoadError) -> Self {
        Self::from_load(RunErrorKind::ResponseFile, err)
    }

    fn from_load(kind: RunErrorKind, err: &LoadError) -> Self {
        let path = match err {
            LoadError::Io { path, .. }
            | LoadError::Json { path, .. }
            | LoadError::Invalid { path, .. } => path.clone(),
        };
        Self::new(kind, err.to_string()).with_path(path)
    }

    pub fn from_provider(err: &ProviderError) -> Self {
        let mut run_error = Self::new(RunErrorKind::from_provider(err), err.to_string());
        match err {
            ProviderError::Server { status, .. }
            | ProviderError::Unauthorized { status, .. }
            | ProviderError::InvalidRequest { status, .. } => {
                run_error = run_error.with_status(*status);
            }
            ProviderError::RateLimited { .. } => run_error = run_error.with_status(429),
            _ => {}
        }
        run_error
    }

    pub fn from_eval(err: &EvalError) -> Self {
        match err {
            EvalError::JudgeUnavailable { task, .. } => {
                Self::new(RunErrorKind::JudgeUnavailable, err.to_string()).with_task(task.clone())
            }
            EvalError::Aborted { source, .. } => {
                let base = match source {
                    JudgeError::Parse { .. } => {
                        Self::new(RunErrorKind::JudgeParse, String::new())
                    }
                    JudgeError::Exhausted { source, .. } | JudgeError::Fatal { source, .. } => {
                        Self::from_provider(source)
                    }
                    JudgeError::Cancelled { .. } => Self::new(RunErrorKind::Cancelled, ""),
                };
                Self {
                    message: err.to_string(),
                    task: Some(source.task().to_string()),
                    ..base
                }
            }
            EvalError::Batch { source, .. } => Self {
                kind: if source.is_fatal() {
                    RunErrorKind::from_provider(source)
                } else {
                    RunErrorKind::BatchFailed
                },
                message: err.to_string(),
                ..Self::from_provider(source)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_split_into_transient_and_fatal() {
        let transient = [
            ProviderError::Timeout {
                message: "t".into(),
            },
            ProviderError::Server {
                status: 503,
                message: "busy".into(),
            },
            ProviderError::Network {
                message: "reset".into(),
            },
        ];
        for e in &transient {
            assert!(e.is_transient(), "{e}");
            assert!(!e.is_fatal(), "{e}");
        }

        let fatal = [
            ProviderError::Unauthorized {
                status: 401,
                message: "bad key".into(),
            },
            ProviderError::InvalidRequest {
                status: 400,
                message: "bad body".into(),
            },
            ProviderError::QuotaExhausted {
                message: "insufficient_quota".into(),
            },
        ];
        for e in &fatal {
            assert!(e.is_fatal(), "{e}");
            assert!(!e.is_transient(), "{e}");
        }

        let rl = ProviderError::RateLimited { retry_after: None };
        assert!(rl.is_rate_limit());
        assert!(!rl.is_transient());
        assert!(!rl.is_fatal());
    }

    #[test]
    fn run_error_names_last_task_on_abort() {
        let err = EvalError::Aborted {
            run: "gpt-run-01".into(),
            source: JudgeError::Exhausted {
                task: "L3_04".into(),
                attempts: 3,
                source: ProviderError::Server {
                    status: 502,
                    message: "bad gateway".into(),
                },
            },
        };
        let run_error = RunError::from_eval(&err);
        assert_eq!(run_error.kind, RunErrorKind::ProviderServer);
        assert_eq!(run_error.task.as_deref(), Some("L3_04"));
        assert_eq!(run_error.status, Some(502));
        assert!(run_error.message.contains("aborted at L3_04"));
        assert!(!err.is_session_fatal());
    }

    #[test]
    fn fatal_provider_error_ends_session() {
        let err = EvalError::Aborted {
            run: "r".into(),
            source: JudgeError::Fatal {
                task: "L2_01".into(),
                source: ProviderError::Unauthorized {
                    status: 401,
                    message: "invalid api key".into(),
                },
            },
        };
        assert!(err.is_session_fatal());
        assert_eq!(RunError::from_eval(&err).kind, RunErrorKind::ProviderAuth);
    }

    #[test]
    fn load_errors_keep_the_path() {
        let err = LoadError::invalid("respostas/a.json", "missing metadata.id");
        let run_error = RunError::response_file(&err);
        assert_eq!(run_error.kind, RunErrorKind::ResponseFile);
        assert_eq!(run_error.path.as_deref(), Some("respostas/a.json"));
        assert_eq!(run_error.kind.as_str(), "response_file");
    }
}
