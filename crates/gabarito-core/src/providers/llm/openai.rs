use super::{LlmClient, LlmResponse};
use crate::config::EvalConfig;
use crate::errors::ProviderError;
use crate::model::TokenUsage;
use crate::providers::http::{bearer, check_response};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct OpenAIClient {
    pub model: String,
    api_key: String,
    pub base_url: String,
    pub temperature: f32,
    /// `Some("flex")` in flex mode; omitted from the body otherwise.
    pub service_tier: Option<&'static str>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("service_tier", &self.service_tier)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: EvalConfig::default().base_url,
            temperature: 0.0,
            service_tier: None,
            client,
        })
    }

    pub fn from_config(config: &EvalConfig, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let mut client = Self::new(config.model.clone(), api_key, config.call_timeout())?
            .with_base_url(&config.base_url);
        client.temperature = config.temperature;
        client.service_tier = config.mode.service_tier();
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

/// Chat completion request body. Shared with batch lines so both paths send
/// the same payload.
pub(crate) fn chat_body(
    model: &str,
    temperature: f32,
    system: &str,
    prompt: &str,
    service_tier: Option<&str>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": prompt},
        ],
        "temperature": temperature,
        "response_format": {"type": "json_object"},
    });
    if let Some(tier) = service_tier {
        body["service_tier"] = json!(tier);
    }
    body
}

/// Reads `choices[0].message.content`, the reporting model and token usage.
pub(crate) fn parse_chat_completion(
    body: &Value,
    fallback_model: &str,
) -> Result<LlmResponse, ProviderError> {
    let text = body
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::InvalidResponse {
            message: "chat completion missing choices[0].message.content".to_string(),
        })?
        .to_string();

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_model)
        .to_string();

    let usage = TokenUsage {
        prompt_tokens: body
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        completion_tokens: body
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    };

    Ok(LlmResponse { text, model, usage })
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<LlmResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = chat_body(
            &self.model,
            self.temperature,
            system,
            prompt,
            self.service_tier,
        );

        debug!(model = %self.model, tier = ?self.service_tier, "chat completion request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, bearer(&self.api_key))
            .json(&body)
            .send()
            .await?;
        let response = check_response(response).await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("chat completion is not JSON: {e}"),
            })?;

        parse_chat_completion(&json, &self.model)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
