use crate::batch::BatchConfig;
use crate::cost::DEFAULT_USD_TO_BRL;
use crate::judge::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How judge requests are executed. Mutually exclusive per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeMode {
    /// Synchronous chat calls at the default service tier.
    #[default]
    Standard,
    /// Synchronous chat calls on the cheaper, slower `flex` tier.
    Flex,
    /// One asynchronous Batch API submission for every request.
    Batch,
}

impl JudgeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JudgeMode::Standard => "standard",
            JudgeMode::Flex => "flex",
            JudgeMode::Batch => "batch",
        }
    }

    pub fn is_batch(self) -> bool {
        matches!(self, JudgeMode::Batch)
    }

    /// `service_tier` sent with direct calls.
    pub fn service_tier(self) -> Option<&'static str> {
        match self {
            JudgeMode::Flex => Some("flex"),
            _ => None,
        }
    }
}

impl fmt::Display for JudgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JudgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(JudgeMode::Standard),
            "flex" => Ok(JudgeMode::Flex),
            "batch" => Ok(JudgeMode::Batch),
            other => Err(format!(
                "unknown judge mode '{other}' (expected standard|flex|batch)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub mode: JudgeMode,

    /// Judge model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Provider credential. Only required when a level 2-4 task is in scope.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub temperature: f32,

    /// Minimum spacing between two direct judge calls.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,

    /// Pause after a provider rate-limit signal before the single retry.
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,

    /// Attempts per request for parse failures and transient provider errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-call HTTP timeout.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Overall batch deadline; the job is marked failed once it passes.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Replaces the built-in judge system prompt.
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,

    /// Conversion applied to the USD cost estimate.
    #[serde(default = "default_usd_to_brl")]
    pub usd_to_brl: f64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_min_call_interval_ms() -> u64 {
    500
}

fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_batch_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_usd_to_brl() -> f64 {
    DEFAULT_USD_TO_BRL
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            mode: JudgeMode::default(),
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            temperature: 0.0,
            min_call_interval_ms: default_min_call_interval_ms(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            max_attempts: default_max_attempts(),
            call_timeout_secs: default_call_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            system_prompt_path: None,
            usd_to_brl: default_usd_to_brl(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl EvalConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `GABARITO_MODE` | `mode` |
    /// | `GABARITO_JUDGE_MODEL` / `OPENAI_MODEL` | `model` |
    /// | `OPENAI_API_KEY` | `api_key` |
    /// | `GABARITO_BASE_URL` | `base_url` |
    /// | `GABARITO_MIN_CALL_INTERVAL_MS` | `min_call_interval_ms` |
    /// | `GABARITO_RATE_LIMIT_COOLDOWN_SECS` | `rate_limit_cooldown_secs` |
    /// | `GABARITO_MAX_ATTEMPTS` | `max_attempts` |
    /// | `GABARITO_CALL_TIMEOUT_SECS` | `call_timeout_secs` |
    /// | `GABARITO_POLL_INTERVAL_SECS` | `poll_interval_secs` |
    /// | `GABARITO_BATCH_TIMEOUT_SECS` | `batch_timeout_secs` |
    /// | `GABARITO_SYSTEM_PROMPT` | `system_prompt_path` |
    /// | `GABARITO_USD_TO_BRL` | `usd_to_brl` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mode: env_parse("GABARITO_MODE").unwrap_or(defaults.mode),
            model: std::env::var("GABARITO_JUDGE_MODEL")
                .or_else(|_| std::env::var("OPENAI_MODEL"))
                .unwrap_or(defaults.model),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("GABARITO_BASE_URL").unwrap_or(defaults.base_url),
            temperature: defaults.temperature,
            min_call_interval_ms: env_parse("GABARITO_MIN_CALL_INTERVAL_MS")
                .unwrap_or(defaults.min_call_interval_ms),
            rate_limit_cooldown_secs: env_parse("GABARITO_RATE_LIMIT_COOLDOWN_SECS")
                .unwrap_or(defaults.rate_limit_cooldown_secs),
            max_attempts: env_parse("GABARITO_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            call_timeout_secs: env_parse("GABARITO_CALL_TIMEOUT_SECS")
                .unwrap_or(defaults.call_timeout_secs),
            poll_interval_secs: env_parse("GABARITO_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.poll_interval_secs),
            batch_timeout_secs: env_parse("GABARITO_BATCH_TIMEOUT_SECS")
                .unwrap_or(defaults.batch_timeout_secs),
            system_prompt_path: std::env::var("GABARITO_SYSTEM_PROMPT").ok().map(PathBuf::from),
            usd_to_brl: env_parse("GABARITO_USD_TO_BRL")
                .filter(|rate: &f64| rate.is_finite() && *rate > 0.0)
                .unwrap_or(defaults.usd_to_brl),
        }
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            rate_limit_cooldown: Duration::from_secs(self.rate_limit_cooldown_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(self.batch_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = EvalConfig::default();
        assert_eq!(cfg.mode, JudgeMode::Standard);
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.rate_limit_cooldown, Duration::from_secs(60));
        assert_eq!(cfg.batch_config().poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let cfg: EvalConfig =
            serde_json::from_str(r#"{"mode": "flex", "model": "gpt-4.1-mini"}"#).unwrap();
        assert_eq!(cfg.mode, JudgeMode::Flex);
        assert_eq!(cfg.mode.service_tier(), Some("flex"));
        assert_eq!(cfg.model, "gpt-4.1-mini");
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.usd_to_brl, 5.0);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("BATCH".parse::<JudgeMode>().unwrap(), JudgeMode::Batch);
        assert!("async".parse::<JudgeMode>().is_err());
        assert!(JudgeMode::Batch.service_tier().is_none());
    }

    #[test]
    fn zero_attempts_still_makes_one_call() {
        let cfg = EvalConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(cfg.retry_policy().max_attempts, 1);
    }
}
