//! Answer key and response file loading.
//!
//! Response files are independent: a broken one is reported and skipped. The
//! answer key is not: any defect in it is fatal for the session.

use crate::errors::LoadError;
use crate::model::{AnswerKey, ResponseSet, TaskId, TaskSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const INLINE: &str = "<inline>";

#[derive(Debug, Deserialize)]
struct RawTaskSpec {
    level: Option<u8>,
    question: Option<String>,
    answer: Option<String>,
    answer_value: Option<serde_json::Value>,
    criteria: Option<Vec<String>>,
}

fn read_to_string(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_answer_key(path: &Path) -> Result<AnswerKey, LoadError> {
    let text = read_to_string(path)?;
    parse_answer_key(&text, &path.display().to_string())
}

pub fn load_response_set(path: &Path) -> Result<ResponseSet, LoadError> {
    let text = read_to_string(path)?;
    parse_response_set(&text, &path.display().to_string())
}

/// Reads a replacement judge system prompt. Blank files are rejected.
pub fn load_system_prompt(path: &Path) -> Result<String, LoadError> {
    let text = read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(LoadError::invalid(
            &path.display().to_string(),
            "system prompt is empty",
        ));
    }
    Ok(text)
}

/// `*.json` files directly under `dir`, sorted by file name.
pub fn discover_response_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl AnswerKey {
    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        parse_answer_key(text, INLINE)
    }
}

impl ResponseSet {
    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        parse_response_set(text, INLINE)
    }
}

fn parse_answer_key(text: &str, path: &str) -> Result<AnswerKey, LoadError> {
    let root: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(text).map_err(|source| LoadError::Json {
            path: path.to_string(),
            source,
        })?;

    let mut key = AnswerKey {
        version: "?".to_string(),
        tasks: BTreeMap::new(),
    };

    for (name, value) in root {
        if name == "version" {
            key.version = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(LoadError::invalid(
                        path,
                        format!("version must be a string, got {other}"),
                    ))
                }
            };
            continue;
        }
        if !name.starts_with('L') {
            continue;
        }
        let id: TaskId = name
            .parse()
            .map_err(|e| LoadError::invalid(path, format!("{e}")))?;
        let raw: RawTaskSpec = serde_json::from_value(value)
            .map_err(|e| LoadError::invalid(path, format!("{id}: {e}")))?;
        let spec = validate_task(&id, raw).map_err(|msg| LoadError::invalid(path, msg))?;
        key.tasks.insert(id, spec);
    }

    Ok(key)
}

fn validate_task(id: &TaskId, raw: RawTaskSpec) -> Result<TaskSpec, String> {
    let level = raw.level.ok_or_else(|| format!("{id}: missing 'level'"))?;
    if level != id.level() {
        return Err(format!(
            "{id}: level {level} does not match the task id level {}",
            id.level()
        ));
    }
    let question = raw
        .question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| format!("{id}: missing 'question'"))?;

    if level == 1 {
        let answer = raw.answer.ok_or_else(|| format!("{id}: missing 'answer'"))?;
        let letter = single_choice_letter(&answer)
            .ok_or_else(|| format!("{id}: answer must be a single letter A-D, got '{answer}'"))?;
        let answer_value = raw
            .answer_value
            .filter(|v| !v.is_null())
            .ok_or_else(|| format!("{id}: missing 'answer_value'"))?;
        Ok(TaskSpec::MultipleChoice {
            question,
            answer: letter,
            answer_value,
        })
    } else {
        let criteria = raw
            .criteria
            .filter(|c| !c.is_empty())
            .ok_or_else(|| format!("{id}: missing or empty 'criteria'"))?;
        Ok(TaskSpec::Criteria {
            level,
            question,
            criteria,
        })
    }
}

fn single_choice_letter(answer: &str) -> Option<char> {
    let normalized = answer.trim().to_ascii_uppercase();
    let mut chars = normalized.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ 'A'..='D'), None) => Some(c),
        _ => None,
    }
}

fn parse_response_set(text: &str, path: &str) -> Result<ResponseSet, LoadError> {
    let root: serde_json::Value = serde_json::from_str(text).map_err(|source| LoadError::Json {
        path: path.to_string(),
        source,
    })?;
    let has_id = root
        .pointer("/metadata/id")
        .and_then(|v| v.as_str())
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        return Err(LoadError::invalid(path, "missing required 'metadata.id'"));
    }
    if root.get("responses").is_none() {
        return Err(LoadError::invalid(path, "missing required 'responses'"));
    }
    serde_json::from_value(root).map_err(|source| LoadError::Json {
        path: path.to_string(),
        source,
    })
}
