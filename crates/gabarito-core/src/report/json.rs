use crate::report::EvaluationReport;
use anyhow::Context;
use std::path::{Path, PathBuf};

pub fn report_path(out_dir: &Path, stamp: &str) -> PathBuf {
    out_dir.join(format!("eval_{stamp}.json"))
}

pub fn write_json(report: &EvaluationReport, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(report)?;
    std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))?;
    Ok(())
}

pub fn read_json(path: &Path) -> anyhow::Result<EvaluationReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeMode;
    use tempfile::tempdir;

    #[test]
    fn written_report_reads_back() {
        let dir = tempdir().unwrap();
        let path = report_path(&dir.path().join("nested"), "20250101_120000");
        let mut report = EvaluationReport::new("2.0", "gpt-4o-mini", JudgeMode::Flex);
        report.add_failure("respostas/broken.json", "invalid JSON");

        write_json(&report, &path).unwrap();
        assert!(path.ends_with("eval_20250101_120000.json"));
        assert_eq!(read_json(&path).unwrap(), report);
    }
}
