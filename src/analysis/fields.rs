use crate::models::raw_task::{CustomField, FieldOption, FieldValue, RawTask};
use std::collections::HashMap;
use thiserror::Error;

pub const PROJECT_FIELD: &str = "Game Name";
pub const CONCEPT_DONE_FIELD: &str = "Ngày tick Done Concept";

pub fn difficulty_field(team_label: &str) -> String {
    format!("{team_label} Difficult")
}

pub fn tool_field(team_label: &str) -> String {
    format!("Tool/CTST {team_label}")
}

/// Name-indexed view over a task's custom fields. Last field wins on a
/// duplicated name.
pub type FieldMap<'a> = HashMap<&'a str, &'a CustomField>;

pub fn index(task: &RawTask) -> FieldMap<'_> {
    task.custom_fields
        .iter()
        .map(|field| (field.name.as_str(), field))
        .collect()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}' expected {expected}, found {found}")]
pub struct CoercionError {
    pub field: String,
    pub expected: &'static str,
    pub found: String,
}

impl CoercionError {
    fn new(field: &str, expected: &'static str, found: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            expected,
            found: found.into(),
        }
    }
}

/// Difficulty level: integers, floats truncated toward zero, or numeric strings.
pub fn coerce_level(field: &str, value: &FieldValue) -> Result<i64, CoercionError> {
    match value {
        FieldValue::Integer(i) => Ok(*i),
        FieldValue::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        FieldValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(CoercionError::new(field, "number", "empty string"));
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(i);
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(f.trunc() as i64),
                _ => Err(CoercionError::new(field, "number", format!("'{trimmed}'"))),
            }
        }
        other => Err(CoercionError::new(field, "number", other.kind())),
    }
}

/// Tool indexes from a multi-select field. Each selected option id is looked
/// up in the option table and the leading digits of its label become the
/// index. Unknown ids and labels without digits are skipped.
pub fn coerce_tools(field: &CustomField) -> Result<Vec<u32>, CoercionError> {
    let selected = match &field.value {
        FieldValue::Null => return Ok(Vec::new()),
        FieldValue::StringList(ids) => ids,
        other => return Err(CoercionError::new(&field.name, "option id list", other.kind())),
    };

    let options = field.options();
    let mut indexes = Vec::new();
    for id in selected {
        let Some(option) = options.iter().find(|option| &option.id == id) else {
            continue;
        };
        if let Some(index) = leading_index(option.display()) {
            if !indexes.contains(&index) {
                indexes.push(index);
            }
        }
    }
    Ok(indexes)
}

fn leading_index(label: &str) -> Option<u32> {
    let label = label.trim_start();
    let digits = label.len() - label.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    label[..digits].parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelection {
    Resolved(String),
    OutOfRange { index: i64, options: usize },
}

/// Project name from a single-select field: the value is a position in the
/// option table and the label's first whitespace-delimited token is dropped.
pub fn coerce_project(field: &CustomField) -> Result<ProjectSelection, CoercionError> {
    let index = match &field.value {
        FieldValue::Integer(i) => *i,
        FieldValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| CoercionError::new(&field.name, "option index", format!("'{s}'")))?,
        other => return Err(CoercionError::new(&field.name, "option index", other.kind())),
    };

    let options = field.options();
    let option = usize::try_from(index).ok().and_then(|i| options.get(i));
    Ok(match option {
        Some(option) => ProjectSelection::Resolved(project_name(option)),
        None => ProjectSelection::OutOfRange {
            index,
            options: options.len(),
        },
    })
}

fn project_name(option: &FieldOption) -> String {
    let label = option.display();
    match label.split_once(' ') {
        Some((_, rest)) => rest.trim().to_string(),
        None => label.trim().to_string(),
    }
}

/// Epoch-millisecond timestamp from an integer or a numeric string.
pub fn coerce_timestamp_millis(field: &str, value: &FieldValue) -> Result<i64, CoercionError> {
    match value {
        FieldValue::Integer(ms) => Ok(*ms),
        FieldValue::Float(ms) if ms.is_finite() => Ok(ms.trunc() as i64),
        FieldValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| CoercionError::new(field, "epoch milliseconds", format!("'{s}'"))),
        other => Err(CoercionError::new(field, "epoch milliseconds", other.kind())),
    }
}
