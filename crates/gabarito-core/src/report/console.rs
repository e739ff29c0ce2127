use crate::aggregate::{LevelStats, Summary};
use crate::cost::CostSummary;
use crate::engine::RunResult;

fn stats_cell(label: &str, s: &LevelStats) -> String {
    format!("{label} {}/{} ({:.0}%)", s.success, s.evaluated, s.rate * 100.0)
}

/// One line per response set: per-level and overall success.
#[must_use]
pub fn format_summary_line(run_id: &str, summary: &Summary) -> String {
    let mut cells: Vec<String> = summary
        .levels
        .iter()
        .map(|(level, s)| stats_cell(level, s))
        .collect();
    cells.push(stats_cell("overall", &summary.overall));
    format!("{run_id}: {}", cells.join(" | "))
}

/// USD with four decimals, BRL with two and a decimal comma.
#[must_use]
pub fn format_cost_line(cost: &CostSummary) -> String {
    let usd = match (cost.estimated_cost_usd, cost.estimated_cost_brl) {
        (Some(usd), Some(brl)) => {
            format!("${usd:.4} (R$ {})", format!("{brl:.2}").replace('.', ","))
        }
        (Some(usd), None) => format!("${usd:.4}"),
        (None, _) => "—".into(),
    };
    format!(
        "Judge {} ({}): {} calls, {} tokens ({} in / {} out), est. cost {usd}",
        cost.model,
        cost.mode,
        cost.api_calls,
        cost.total_tokens,
        cost.prompt_tokens,
        cost.completion_tokens
    )
}

/// Print per-set summaries and inconclusive tasks to stderr.
pub fn print_summary(results: &[RunResult]) {
    eprintln!();
    for result in results {
        eprintln!("{}", format_summary_line(&result.run_id, &result.summary()));
        for (id, reason) in result.inconclusive() {
            eprintln!("    ? {id}: {reason}");
        }
    }
}

/// Cost line plus artifact locations.
pub fn print_run_footer(cost: Option<&CostSummary>, artifacts: &[&std::path::Path]) {
    if let Some(c) = cost {
        eprintln!("{}", format_cost_line(c));
    }
    for path in artifacts {
        eprintln!("Wrote {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeMode;
    use crate::judge::JudgeUsage;
    use crate::model::TokenUsage;
    use std::collections::BTreeMap;

    #[test]
    fn summary_line_lists_levels_then_overall() {
        let mut levels = BTreeMap::new();
        levels.insert(
            "L1".to_string(),
            LevelStats {
                evaluated: 4,
                success: 3,
                rate: 0.75,
            },
        );
        levels.insert(
            "L3".to_string(),
            LevelStats {
                evaluated: 2,
                success: 0,
                rate: 0.0,
            },
        );
        let summary = Summary {
            levels,
            overall: LevelStats {
                evaluated: 6,
                success: 3,
                rate: 0.5,
            },
        };
        assert_eq!(
            format_summary_line("run-a", &summary),
            "run-a: L1 3/4 (75%) | L3 0/2 (0%) | overall 3/6 (50%)"
        );
    }

    #[test]
    fn cost_line_handles_unknown_price() {
        let usage = JudgeUsage {
            api_calls: 2,
            tokens: TokenUsage {
                prompt_tokens: 900,
                completion_tokens: 100,
            },
        };
        let unknown = CostSummary::new("local-model", JudgeMode::Standard, usage);
        assert_eq!(
            format_cost_line(&unknown),
            "Judge local-model (standard): 2 calls, 1000 tokens (900 in / 100 out), est. cost —"
        );
        let known = CostSummary::new("gpt-4o-mini", JudgeMode::Batch, usage);
        assert!(format_cost_line(&known).ends_with("est. cost $0.0001 (R$ 0,00)"));
    }

    #[test]
    fn cost_line_prints_both_currencies() {
        let usage = JudgeUsage {
            api_calls: 10,
            tokens: TokenUsage {
                prompt_tokens: 1_000_000,
                completion_tokens: 1_000_000,
            },
        };
        let cost =
            CostSummary::new("gpt-4o-mini", JudgeMode::Standard, usage).with_usd_to_brl(5.4);
        assert!(
            format_cost_line(&cost).ends_with("est. cost $0.7500 (R$ 4,05)"),
            "{}",
            format_cost_line(&cost)
        );
    }
}
