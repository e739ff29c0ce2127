//! Asynchronous bulk judging backends.

use crate::errors::ProviderError;
use crate::providers::llm::LlmResponse;
use async_trait::async_trait;
use std::fmt;

pub mod openai;

pub use openai::OpenAIBatchBackend;

/// One request line of a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLine {
    pub custom_id: String,
    pub prompt: String,
}

/// Provider-side batch status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Validating,
    InProgress,
    Finalizing,
    Cancelling,
    Completed,
    Failed,
    Expired,
    Cancelled,
    Unknown(String),
}

impl RemoteStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "validating" => Self::Validating,
            "in_progress" => Self::InProgress,
            "finalizing" => Self::Finalizing,
            "cancelling" => Self::Cancelling,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            "cancelled" => Self::Cancelled,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Unknown(s) => s,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteBatch {
    pub id: String,
    pub status: RemoteStatus,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub counts: RequestCounts,
}

/// One result line, already split into success or per-request failure.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub custom_id: String,
    pub result: Result<LlmResponse, String>,
}

#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Uploads the request lines and creates the remote batch. Returns its id.
    async fn submit(&self, system: &str, lines: &[BatchLine]) -> Result<String, ProviderError>;

    async fn status(&self, batch_id: &str) -> Result<RemoteBatch, ProviderError>;

    /// Downloads output and error files of a terminal batch.
    async fn fetch_results(&self, batch: &RemoteBatch) -> Result<Vec<BatchItem>, ProviderError>;

    fn provider_name(&self) -> &'static str;

    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_final_statuses_are_terminal() {
        for s in ["completed", "failed", "expired", "cancelled"] {
            assert!(RemoteStatus::parse(s).is_terminal(), "{s}");
        }
        for s in ["validating", "in_progress", "finalizing", "cancelling", "paused"] {
            assert!(!RemoteStatus::parse(s).is_terminal(), "{s}");
        }
        assert_eq!(RemoteStatus::parse("paused").to_string(), "paused");
    }
}
