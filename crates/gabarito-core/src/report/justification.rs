//! Markdown justification artifact: why each task passed or failed.

use crate::config::JudgeMode;
use crate::engine::RunResult;
use crate::model::TaskOutcome;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct JustificationHeader {
    pub date: String,
    pub judge_model: String,
    pub mode: JudgeMode,
    pub gabarito_version: String,
    pub files: usize,
    pub api_calls: u64,
    pub elapsed_minutes: f64,
}

pub fn justification_path(out_dir: &Path, stamp: &str) -> PathBuf {
    out_dir.join(format!("justifications_{stamp}.md"))
}

fn answer_value(s: &str) -> String {
    format!("'{s}'")
}

/// Evidence on a single line; `absent` when the judge gave none.
fn one_line_evidence(evidence: &str) -> String {
    let line = evidence.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.is_empty() {
        "absent".to_string()
    } else {
        line
    }
}

pub fn render(header: &JustificationHeader, results: &[RunResult]) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Judge justifications\n");
    let _ = writeln!(md, "- **Date:** {}", header.date);
    let _ = writeln!(md, "- **Judge model:** {}", header.judge_model);
    let _ = writeln!(md, "- **Mode:** {}", header.mode);
    let _ = writeln!(md, "- **Answer key version:** {}", header.gabarito_version);
    let _ = writeln!(md, "- **Files evaluated:** {}", header.files);
    let _ = writeln!(md, "- **API calls:** {}", header.api_calls);
    let _ = writeln!(md, "- **Elapsed:** {:.1} min", header.elapsed_minutes);

    for result in results {
        let _ = writeln!(md, "\n---\n\n## {}\n", result.run_id);
        let mut failures = String::new();

        for (id, outcome) in &result.outcomes {
            match outcome {
                TaskOutcome::Choice {
                    verdict,
                    given,
                    expected,
                } => {
                    let expected = answer_value(&expected.to_string());
                    if verdict.is_pass() {
                        let _ = writeln!(md, "✓ {id} — {} = {expected}", answer_value(given));
                    } else {
                        let _ = writeln!(md, "✗ {id} — {} ≠ {expected}", answer_value(given));
                    }
                }
                TaskOutcome::Judged(resp) if resp.verdict().is_pass() => {
                    let _ = writeln!(md, "✓ {id} — all criteria met");
                }
                TaskOutcome::Judged(resp) => {
                    let _ = writeln!(failures, "\n### {} — {id}", result.run_id);
                    for (i, c) in resp.criteria.iter().enumerate() {
                        let n = c.id.unwrap_or(i as u32 + 1);
                        let mark = if c.met { '✓' } else { '✗' };
                        let _ = writeln!(
                            failures,
                            "- C{n}: {mark} — {}",
                            one_line_evidence(&c.evidence)
                        );
                    }
                    if let Some(h) = &resp.hallucination {
                        let _ = writeln!(failures, "- Hallucination: {h}");
                    }
                    let _ = writeln!(
                        failures,
                        "- **Verdict: 0** ({})",
                        resp.failure_reason()
                    );
                }
                TaskOutcome::Inconclusive { reason } => {
                    let _ = writeln!(failures, "\n### {} — {id}", result.run_id);
                    let _ = writeln!(failures, "- INCONCLUSIVE: {reason}");
                }
            }
        }
        md.push_str(&failures);

        if !result.warnings.is_empty() {
            let _ = writeln!(md, "\n**Warnings:**");
            for w in &result.warnings {
                let _ = writeln!(md, "- {w}");
            }
        }
    }
    md
}
