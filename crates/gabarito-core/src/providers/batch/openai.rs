use super::{BatchBackend, BatchItem, BatchLine, RemoteBatch, RemoteStatus, RequestCounts};
use crate::config::EvalConfig;
use crate::errors::ProviderError;
use crate::providers::http::{bearer, check_response};
use crate::providers::llm::openai::{chat_body, parse_chat_completion};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const CHAT_ENDPOINT: &str = "/v1/chat/completions";
const COMPLETION_WINDOW: &str = "24h";

/// OpenAI Batch API: JSONL upload, batch creation, status polling, result download.
pub struct OpenAIBatchBackend {
    pub model: String,
    api_key: String,
    pub base_url: String,
    pub temperature: f32,
    client: reqwest::Client,
}

impl OpenAIBatchBackend {
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
            client,
        })
    }

    pub fn from_config(config: &EvalConfig, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let mut backend = Self::new(config.model.clone(), api_key, config.call_timeout())?;
        backend.base_url = config.base_url.trim_end_matches('/').to_string();
        backend.temperature = config.temperature;
        Ok(backend)
    }

    fn jsonl(&self, system: &str, lines: &[BatchLine]) -> String {
        let mut out = String::new();
        for line in lines {
            let entry = json!({
                "custom_id": line.custom_id,
                "method": "POST",
                "url": CHAT_ENDPOINT,
                "body": chat_body(&self.model, self.temperature, system, &line.prompt, None),
            });
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    async fn get_json(&self, url: &str) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, bearer(&self.api_key))
            .send()
            .await?;
        let response = check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("{url}: body is not JSON: {e}"),
            })
    }

    async fn file_content(&self, file_id: &str) -> Result<String, ProviderError> {
        let url = format!("{}/files/{}/content", self.base_url, file_id);
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, bearer(&self.api_key))
            .send()
            .await?;
        let response = check_response(response).await?;
        Ok(response.text().await?)
    }
}

fn required_str(body: &Value, field: &str, what: &str) -> Result<String, ProviderError> {
    body.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse {
            message: format!("{what} response missing '{field}'"),
        })
}

fn parse_remote_batch(body: &Value) -> Result<RemoteBatch, ProviderError> {
    let id = required_str(body, "id", "batch")?;
    let status = RemoteStatus::parse(&required_str(body, "status", "batch")?);
    let opt = |field: &str| {
        body.get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let count = |field: &str| {
        body.pointer(&format!("/request_counts/{field}"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    Ok(RemoteBatch {
        id,
        status,
        output_file_id: opt("output_file_id"),
        error_file_id: opt("error_file_id"),
        counts: RequestCounts {
            total: count("total"),
            completed: count("completed"),
            failed: count("failed"),
        },
    })
}

/// Splits a result file into per-request items. Lines without a `custom_id`
/// are dropped; reconciliation then sees those requests as missing.
pub(crate) fn parse_result_lines(text: &str, fallback_model: &str) -> Vec<BatchItem> {
    let mut items = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let line: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = n + 1, error = %e, "skipping unparseable batch result line");
                continue;
            }
        };
        let Some(custom_id) = line.get("custom_id").and_then(|v| v.as_str()) else {
            warn!(line = n + 1, "skipping batch result line without custom_id");
            continue;
        };
        items.push(BatchItem {
            custom_id: custom_id.to_string(),
            result: line_result(&line, fallback_model),
        });
    }
    items
}

fn line_result(
    line: &Value,
    fallback_model: &str,
) -> Result<crate::providers::llm::LlmResponse, String> {
    if let Some(err) = line.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(format!("provider error: {message}"));
    }
    let response = line
        .get("response")
        .filter(|r| !r.is_null())
        .ok_or_else(|| "result line has neither response nor error".to_string())?;
    let status = response
        .get("status_code")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let body = response.get("body").cloned().unwrap_or(Value::Null);
    if status != 200 {
        let message = body
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message");
        return Err(format!("status {status}: {message}"));
    }
    parse_chat_completion(&body, fallback_model).map_err(|e| e.to_string())
}

#[async_trait]
impl BatchBackend for OpenAIBatchBackend {
    async fn submit(&self, system: &str, lines: &[BatchLine]) -> Result<String, ProviderError> {
        let payload = self.jsonl(system, lines);
        debug!(requests = lines.len(), bytes = payload.len(), "uploading batch input");

        let part = reqwest::multipart::Part::bytes(payload.into_bytes())
            .file_name("gabarito_batch.jsonl")
            .mime_str("application/jsonl")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .header(AUTHORIZATION, bearer(&self.api_key))
            .multipart(form)
            .send()
            .await?;
        let uploaded: Value = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("file upload response is not JSON: {e}"),
            })?;
        let input_file_id = required_str(&uploaded, "id", "file upload")?;

        let response = self
            .client
            .post(format!("{}/batches", self.base_url))
            .header(AUTHORIZATION, bearer(&self.api_key))
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": CHAT_ENDPOINT,
                "completion_window": COMPLETION_WINDOW,
            }))
            .send()
            .await?;
        let created: Value = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("batch create response is not JSON: {e}"),
            })?;
        required_str(&created, "id", "batch create")
    }

    async fn status(&self, batch_id: &str) -> Result<RemoteBatch, ProviderError> {
        let body = self
            .get_json(&format!("{}/batches/{}", self.base_url, batch_id))
            .await?;
        parse_remote_batch(&body)
    }

    async fn fetch_results(&self, batch: &RemoteBatch) -> Result<Vec<BatchItem>, ProviderError> {
        let mut items = Vec::new();
        for file_id in [&batch.output_file_id, &batch.error_file_id]
            .into_iter()
            .flatten()
        {
            let text = self.file_content(file_id).await?;
            items.extend(parse_result_lines(&text, &self.model));
        }
        Ok(items)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
