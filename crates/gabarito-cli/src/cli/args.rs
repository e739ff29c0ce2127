use clap::{Parser, Subcommand};
use gabarito_core::{EvalConfig, JudgeMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gabarito",
    version,
    about = "Grade LLM answers against an answer key: exact matching for multiple choice, an LLM judge for the rest"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate response files and write the report and justifications
    Run(RunArgs),
    /// Re-aggregate the verdicts of an existing report
    Summarize(SummarizeArgs),
    Version,
}

#[derive(Parser, Clone, Debug)]
pub struct RunArgs {
    /// Judge mode: standard|flex|batch
    #[arg(long, env = "GABARITO_MODE")]
    pub mode: Option<JudgeMode>,

    #[arg(long, default_value = "data/gabarito.json")]
    pub answer_key: PathBuf,

    /// Directory of response set files (*.json)
    #[arg(long, default_value = "data/respostas")]
    pub responses: PathBuf,

    /// Evaluate a single file from the responses directory
    #[arg(long)]
    pub file: Option<String>,

    /// Output directory for eval_*.json and justifications_*.md
    #[arg(long, default_value = "data/resultados")]
    pub out: PathBuf,

    #[command(flatten)]
    pub judge: JudgeArgs,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct JudgeArgs {
    /// Judge model identifier, e.g. gpt-4o-mini
    #[arg(long, env = "GABARITO_JUDGE_MODEL")]
    pub judge_model: Option<String>,

    #[arg(long, hide = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, hide = true, env = "GABARITO_BASE_URL")]
    pub base_url: Option<String>,

    /// File replacing the built-in judge system prompt
    #[arg(long, env = "GABARITO_SYSTEM_PROMPT")]
    pub system_prompt: Option<PathBuf>,

    /// Minimum spacing between direct judge calls
    #[arg(long)]
    pub min_call_interval_ms: Option<u64>,

    /// Pause after a rate-limit signal
    #[arg(long)]
    pub rate_limit_cooldown_secs: Option<u64>,

    /// Attempts per task, shared by parse failures and transient errors
    #[arg(long)]
    pub max_attempts: Option<u32>,

    #[arg(long)]
    pub call_timeout_secs: Option<u64>,

    /// Batch status polling interval
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Overall batch deadline
    #[arg(long)]
    pub batch_timeout_secs: Option<u64>,

    /// Rate used for the BRL cost estimate
    #[arg(long = "usd-to-brl")]
    pub usd_to_brl: Option<f64>,
}

impl JudgeArgs {
    /// Flags override the environment, which overrides the defaults.
    pub fn apply(&self, config: &mut EvalConfig) {
        if let Some(model) = &self.judge_model {
            config.model = model.clone();
        }
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            config.api_key = Some(key.clone());
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(path) = &self.system_prompt {
            config.system_prompt_path = Some(path.clone());
        }
        if let Some(v) = self.min_call_interval_ms {
            config.min_call_interval_ms = v;
        }
        if let Some(v) = self.rate_limit_cooldown_secs {
            config.rate_limit_cooldown_secs = v;
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.call_timeout_secs {
            config.call_timeout_secs = v;
        }
        if let Some(v) = self.poll_interval_secs {
            config.poll_interval_secs = v;
        }
        if let Some(v) = self.batch_timeout_secs {
            config.batch_timeout_secs = v;
        }
        if let Some(rate) = self.usd_to_brl.filter(|r| r.is_finite() && *r > 0.0) {
            config.usd_to_brl = rate;
        }
    }
}

impl RunArgs {
    pub fn config(&self) -> EvalConfig {
        let mut config = EvalConfig::from_env();
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        self.judge.apply(&mut config);
        config
    }
}

#[derive(Parser, Clone, Debug)]
pub struct SummarizeArgs {
    /// Evaluation report (eval_*.json)
    #[arg(long)]
    pub report: PathBuf,
}
