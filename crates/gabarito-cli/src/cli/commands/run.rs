use super::super::args::RunArgs;
use crate::exit_codes::{self, CONFIG_ERROR, PARTIAL, PROVIDER_ERROR, SUCCESS};
use gabarito_core::batch::{BatchManager, BatchState};
use gabarito_core::judge::DEFAULT_SYSTEM_PROMPT;
use gabarito_core::load::{
    discover_response_files, load_answer_key, load_response_set, load_system_prompt,
};
use gabarito_core::providers::batch::OpenAIBatchBackend;
use gabarito_core::providers::llm::OpenAIClient;
use gabarito_core::report::console::{print_run_footer, print_summary};
use gabarito_core::report::json::{report_path, write_json};
use gabarito_core::report::justification::{self, JustificationHeader};
use gabarito_core::report::progress::stderr_sink;
use gabarito_core::{
    CallScheduler, CostSummary, EvalConfig, EvaluationReport, Evaluator, JudgeClient,
    JudgeUsage, ProviderError, ResponseSet, RunError, RunResult,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A loaded response set and the file it came from.
struct Loaded {
    label: String,
    set: ResponseSet,
}

pub(crate) async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let config = args.config();

    let key = match load_answer_key(&args.answer_key) {
        Ok(k) => Arc::new(k),
        Err(e) => {
            eprintln!("config error: {}", RunError::answer_key(&e).message);
            return Ok(CONFIG_ERROR);
        }
    };
    let system_prompt = match &config.system_prompt_path {
        Some(path) => match load_system_prompt(path) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("config error: {e}");
                return Ok(CONFIG_ERROR);
            }
        },
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    let files = match &args.file {
        Some(name) => vec![args.responses.join(name)],
        None => match discover_response_files(&args.responses) {
            Ok(files) => files,
            Err(e) => {
                eprintln!("config error: {e}");
                return Ok(CONFIG_ERROR);
            }
        },
    };
    if files.is_empty() {
        eprintln!(
            "config error: no response files in {}",
            args.responses.display()
        );
        return Ok(CONFIG_ERROR);
    }

    let mut report = EvaluationReport::new(&key.version, &config.model, config.mode);
    let mut exit = SUCCESS;
    let sets = load_sets(&files, &mut report, &mut exit);

    let mut evaluator = Evaluator::new(key.clone());
    let needs_judge = sets.iter().any(|l| evaluator.needs_judge(&l.set));
    let api_key = match (&config.api_key, needs_judge) {
        (_, false) => None,
        (Some(k), true) => Some(k.clone()),
        (None, true) => {
            eprintln!(
                "config error: level 2-4 tasks need the judge; set OPENAI_API_KEY or pass --api-key"
            );
            return Ok(CONFIG_ERROR);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, stopping after the current step...");
                cancel.cancel();
            }
        });
    }

    eprintln!(
        "Evaluating {} file(s) against answer key v{} ({} tasks), mode {}, judge {}",
        sets.len(),
        key.version,
        key.len(),
        config.mode,
        config.model
    );
    let started = Instant::now();

    let (results, usage) = match api_key {
        Some(api_key) if config.mode.is_batch() => {
            let backend = OpenAIBatchBackend::from_config(&config, api_key)?;
            let manager = BatchManager::new(Arc::new(backend), config.batch_config())
                .with_system_prompt(system_prompt);
            run_batch(&evaluator, &sets, &manager, &cancel, &mut exit).await
        }
        api_key => {
            if let Some(api_key) = api_key {
                evaluator = evaluator.with_judge(judge_client(&config, api_key, system_prompt)?);
            }
            run_direct(&evaluator, &sets, &cancel, &mut report, &mut exit).await
        }
    };
    if cancel.is_cancelled() {
        exit = exit_codes::worst(exit, PARTIAL);
    }

    if needs_judge {
        report.cost_summary = Some(
            CostSummary::new(&config.model, config.mode, usage).with_usd_to_brl(config.usd_to_brl),
        );
    }
    for result in &results {
        report.add_result(result);
        if result.has_inconclusive() {
            exit = exit_codes::worst(exit, PARTIAL);
        }
    }

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let json_path = report_path(&args.out, &stamp);
    write_json(&report, &json_path)?;

    let header = JustificationHeader {
        date: chrono::Local::now().format("%Y-%m-%d %H:%M").to_string(),
        judge_model: config.model.clone(),
        mode: config.mode,
        gabarito_version: key.version.clone(),
        files: results.len(),
        api_calls: usage.api_calls,
        elapsed_minutes: started.elapsed().as_secs_f64() / 60.0,
    };
    let md_path = justification::justification_path(&args.out, &stamp);
    write_justifications(&md_path, &justification::render(&header, &results))?;

    print_summary(&results);
    for (file, error) in &report.failed_files {
        eprintln!("  ! {file}: {error}");
    }
    eprintln!(
        "\nMode {} | judge {} | {} file(s) | {:.1} min",
        config.mode,
        config.model,
        results.len(),
        header.elapsed_minutes
    );
    print_run_footer(
        report.cost_summary.as_ref(),
        &[json_path.as_path(), md_path.as_path()],
    );
    Ok(exit)
}

/// Loads every file; unreadable files and repeated set ids land in `failed_files`.
fn load_sets(files: &[PathBuf], report: &mut EvaluationReport, exit: &mut i32) -> Vec<Loaded> {
    let mut sets: Vec<Loaded> = Vec::new();
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for path in files {
        let label = path.display().to_string();
        match load_response_set(path) {
            Ok(set) => {
                if let Some(first) = seen.get(set.id()) {
                    let msg = format!(
                        "duplicate response set id '{}' (already loaded from {first})",
                        set.id()
                    );
                    tracing::warn!(file = %label, "{msg}");
                    report.add_failure(label, msg);
                    *exit = exit_codes::worst(*exit, PARTIAL);
                    continue;
                }
                seen.insert(set.id().to_string(), label.clone());
                sets.push(Loaded { label, set });
            }
            Err(e) => {
                let err = RunError::response_file(&e);
                tracing::warn!(file = %label, error = %err.message, "skipping response file");
                *exit = exit_codes::worst(*exit, exit_codes::for_error(&err));
                report.add_failure(label, err.message);
            }
        }
    }
    sets
}

fn judge_client(
    config: &EvalConfig,
    api_key: String,
    system_prompt: String,
) -> Result<JudgeClient, ProviderError> {
    let llm = OpenAIClient::from_config(config, api_key)?;
    Ok(JudgeClient::new(
        Arc::new(llm),
        CallScheduler::new(config.min_call_interval()),
        config.retry_policy(),
    )
    .with_system_prompt(system_prompt))
}

async fn run_direct(
    evaluator: &Evaluator,
    sets: &[Loaded],
    cancel: &CancellationToken,
    report: &mut EvaluationReport,
    exit: &mut i32,
) -> (Vec<RunResult>, JudgeUsage) {
    let progress = stderr_sink();
    let mut results = Vec::with_capacity(sets.len());
    let mut remaining = sets.iter();

    while let Some(loaded) = remaining.next() {
        if cancel.is_cancelled() {
            report.add_failure(loaded.label.clone(), "not evaluated: cancelled");
            continue;
        }
        eprintln!("\n{} ({})", loaded.set.id(), loaded.label);
        let run = evaluator
            .evaluate_direct(&loaded.set, cancel, Some(&progress))
            .await;
        if run.error.is_none() || !run.result.outcomes.is_empty() {
            results.push(run.result);
        }
        let Some(e) = run.error else {
            continue;
        };
        let err = RunError::from_eval(&e);
        eprintln!("error: {e}");
        *exit = exit_codes::worst(*exit, exit_codes::for_error(&err));
        report.add_failure(loaded.label.clone(), err.message);
        if e.is_session_fatal() {
            for skipped in remaining.by_ref() {
                report.add_failure(
                    skipped.label.clone(),
                    "not evaluated: session aborted after a fatal provider error",
                );
            }
        }
    }

    let usage = evaluator.judge().map(JudgeClient::usage).unwrap_or_default();
    (results, usage)
}

async fn run_batch(
    evaluator: &Evaluator,
    sets: &[Loaded],
    manager: &BatchManager,
    cancel: &CancellationToken,
    exit: &mut i32,
) -> (Vec<RunResult>, JudgeUsage) {
    let progress = stderr_sink();
    let plain: Vec<ResponseSet> = sets.iter().map(|l| l.set.clone()).collect();
    let run = evaluator
        .evaluate_batch(&plain, manager, cancel, Some(&progress))
        .await;

    if let Some(e) = &run.error {
        eprintln!("error: {e}");
        *exit = exit_codes::worst(*exit, PROVIDER_ERROR);
    }
    match run.job.state() {
        BatchState::Failed { reason } => {
            eprintln!("batch failed: {reason}");
            *exit = exit_codes::worst(*exit, PROVIDER_ERROR);
        }
        BatchState::Abandoned => *exit = exit_codes::worst(*exit, PARTIAL),
        state => tracing::info!(state = %state, requests = run.job.len(), "batch finished"),
    }
    if let Some(id) = &run.job.submission_id {
        eprintln!("batch id: {id}");
    }

    let usage = run.job.usage();
    (run.results, usage)
}

fn write_justifications(path: &Path, text: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}
