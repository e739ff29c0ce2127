use super::super::args::SummarizeArgs;
use crate::exit_codes::{PARTIAL, SUCCESS};
use gabarito_core::report::console::format_summary_line;
use gabarito_core::report::json::read_json;

/// Recomputes every summary from the recorded verdicts and reports drift.
pub(crate) fn run(args: SummarizeArgs) -> anyhow::Result<i32> {
    let report = read_json(&args.report)?;
    eprintln!(
        "{} ({} mode, judge {}, {} file(s): {})",
        args.report.display(),
        report.judge_mode,
        report.judge_model,
        report.files_evaluated.len(),
        report.files_evaluated.join(", ")
    );

    let mut drift = 0;
    for (id, summary) in report.resummarize() {
        println!("{}", format_summary_line(&id, &summary));
        let recorded = report.results.get(&id).map(|r| &r.summary);
        if recorded != Some(&summary) {
            eprintln!("  summary of '{id}' differs from the recorded one");
            drift += 1;
        }
    }
    for (file, error) in &report.failed_files {
        eprintln!("  ! {file}: {error}");
    }

    Ok(if drift == 0 { SUCCESS } else { PARTIAL })
}
