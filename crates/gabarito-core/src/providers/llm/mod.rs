use crate::errors::ProviderError;
use crate::model::TokenUsage;
use async_trait::async_trait;

pub mod openai;

pub use openai::OpenAIClient;

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    /// Model that actually answered, as reported by the provider.
    pub model: String,
    pub usage: TokenUsage,
}

/// One synchronous chat completion. Implementations own transport and status
/// mapping; retry policy belongs to the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<LlmResponse, ProviderError>;

    fn provider_name(&self) -> &'static str;

    /// Configured model identifier.
    fn model(&self) -> &str;
}
