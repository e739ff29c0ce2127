//! Progress events emitted by the engine and batch manager. The CLI renders
//! them to stderr through a sink.

use crate::model::{TaskId, Verdict};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// One task of a response set was resolved (direct mode).
    Task {
        done: usize,
        total: usize,
        task: TaskId,
        verdict: Option<Verdict>,
        judged: bool,
    },
    /// Remote batch status after a poll.
    Batch {
        status: String,
        completed: u64,
        failed: u64,
        total: u64,
        elapsed_secs: u64,
    },
}

pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

fn mark(verdict: Option<Verdict>) -> char {
    match verdict {
        Some(Verdict::Pass) => '✓',
        Some(Verdict::Fail) => '✗',
        None => '?',
    }
}

/// Single display line for an event. Deterministic, unit-testable.
#[must_use]
pub fn format_progress_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Task {
            done,
            total,
            task,
            verdict,
            judged,
        } => {
            let source = if *judged { "judge" } else { "L1" };
            format!(
                "  [{done:>3}/{total}] {task}: {} ({source})",
                mark(*verdict)
            )
        }
        ProgressEvent::Batch {
            status,
            completed,
            failed,
            total,
            elapsed_secs,
        } => format!(
            "  [{:>3}m{:02}s] batch {status}: {completed}/{total} done, {failed} failed",
            elapsed_secs / 60,
            elapsed_secs % 60
        ),
    }
}

/// Sink printing every event to stderr.
pub fn stderr_sink() -> ProgressSink {
    Arc::new(|event: &ProgressEvent| eprintln!("{}", format_progress_line(event)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_line_shows_counter_mark_and_source() {
        let line = format_progress_line(&ProgressEvent::Task {
            done: 3,
            total: 12,
            task: "L2_03".parse().unwrap(),
            verdict: Some(Verdict::Pass),
            judged: true,
        });
        assert_eq!(line, "  [  3/12] L2_03: ✓ (judge)");

        let line = format_progress_line(&ProgressEvent::Task {
            done: 1,
            total: 2,
            task: "L1_01".parse().unwrap(),
            verdict: None,
            judged: false,
        });
        assert!(line.ends_with("L1_01: ? (L1)"));
    }

    #[test]
    fn batch_line_shows_elapsed_and_counts() {
        let line = format_progress_line(&ProgressEvent::Batch {
            status: "in_progress".into(),
            completed: 4,
            failed: 1,
            total: 10,
            elapsed_secs: 125,
        });
        assert_eq!(line, "  [  2m05s] batch in_progress: 4/10 done, 1 failed");
    }
}
