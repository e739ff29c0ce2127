use crate::model::{AnswerKey, ResponseSet, TaskId};

/// Partition of one response set's answered tasks by evaluation method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Level 1, resolved by the deterministic matcher.
    pub auto_eval: Vec<TaskId>,
    /// Levels 2-4, sent to the judge.
    pub judge_eval: Vec<TaskId>,
    /// Response keys that are not tasks of the answer key.
    pub unknown: Vec<String>,
}

impl Classification {
    pub fn in_scope(&self) -> usize {
        self.auto_eval.len() + self.judge_eval.len()
    }

    /// In-scope ids in task order.
    pub fn all(&self) -> impl Iterator<Item = &TaskId> {
        self.auto_eval.iter().chain(self.judge_eval.iter())
    }

    pub fn unknown_warnings(&self) -> Vec<String> {
        self.unknown
            .iter()
            .map(|raw| format!("unknown task '{raw}' ignored"))
            .collect()
    }
}

/// Restricts `set` to ids present in `key` and splits them by level.
/// Both output lists are sorted by task id.
pub fn classify(key: &AnswerKey, set: &ResponseSet) -> Classification {
    let mut out = Classification::default();
    for raw in set.responses.keys() {
        match raw.parse::<TaskId>() {
            Ok(id) if key.get(&id).is_some() => {
                if id.needs_judge() {
                    out.judge_eval.push(id);
                } else {
                    out.auto_eval.push(id);
                }
            }
            _ => out.unknown.push(raw.clone()),
        }
    }
    out.auto_eval.sort();
    out.judge_eval.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AnswerKey {
        AnswerKey::from_json_str(
            r#"{
            "L1_01": {"level": 1, "question": "q", "answer": "A", "answer_value": 1},
            "L1_10": {"level": 1, "question": "q", "answer": "B", "answer_value": 2},
            "L2_01": {"level": 2, "question": "q", "criteria": ["c"]},
            "L4_01": {"level": 4, "question": "q", "criteria": ["c"]}
        }"#,
        )
        .unwrap()
    }

    fn responses(ids: &[&str]) -> ResponseSet {
        let responses: serde_json::Map<String, serde_json::Value> = ids
            .iter()
            .map(|id| (id.to_string(), serde_json::json!("x")))
            .collect();
        ResponseSet::from_json_str(
            &serde_json::json!({"metadata": {"id": "r"}, "responses": responses}).to_string(),
        )
        .unwrap()
    }

    #[test]
    fn splits_by_level_and_keeps_only_known_ids() {
        let c = classify(
            &key(),
            &responses(&["L4_01", "L1_10", "L1_01", "L2_01", "L3_99", "bogus"]),
        );
        let auto: Vec<&str> = c.auto_eval.iter().map(TaskId::as_str).collect();
        let judge: Vec<&str> = c.judge_eval.iter().map(TaskId::as_str).collect();
        assert_eq!(auto, vec!["L1_01", "L1_10"]);
        assert_eq!(judge, vec!["L2_01", "L4_01"]);
        assert_eq!(c.unknown, vec!["L3_99", "bogus"]);
        assert_eq!(c.in_scope(), 4);
    }

    #[test]
    fn tasks_absent_from_response_are_not_in_scope() {
        let c = classify(&key(), &responses(&["L2_01"]));
        assert!(c.auto_eval.is_empty());
        assert_eq!(c.judge_eval.len(), 1);
        assert!(c.unknown_warnings().is_empty());
    }
}
