use crate::analysis::fields::{
    coerce_level, coerce_project, coerce_timestamp_millis, coerce_tools, difficulty_field,
    tool_field, CoercionError, FieldMap, ProjectSelection, PROJECT_FIELD,
};
use crate::analysis::window::{from_millis, TimeWindow};
use crate::models::completed_task::{CompletedTask, Team};
use crate::models::raw_task::{CustomField, FieldValue, RawTask};
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashSet;
use thiserror::Error;

/// Tracker abbreviation that the playable team's default task-type carries.
pub const PLAYABLE_ABBREVIATION: &str = "pla";
pub const PLAYABLE_TASK_TYPE: &str = "playable";

/// Which assignee represents a task. Team-scoped fetches prefer the second
/// entry when several are listed; the concept fetch always takes the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneePolicy {
    PreferSecond,
    First,
}

/// Where the completion instant of a raw task is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    DateDone,
    Field(&'static str),
}

impl CompletionSource {
    fn name(&self) -> &'static str {
        match *self {
            CompletionSource::DateDone => "date_done",
            CompletionSource::Field(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyContext<'a> {
    pub team: Team,
    pub tag: &'a str,
    pub window: TimeWindow,
    pub bucket: DateTime<Utc>,
    pub completion: CompletionSource,
    pub assignee: AssigneePolicy,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("no completion timestamp")]
    NoCompletionTimestamp,
    #[error("completed at {0}, outside window")]
    OutsideWindow(DateTime<Utc>),
    #[error("missing custom field: {0}")]
    MissingDifficulty(String),
    #[error("missing custom field: {}", PROJECT_FIELD)]
    MissingProject,
    #[error("invalid {} index {index} ({options} options)", PROJECT_FIELD)]
    ProjectOptionOutOfRange { index: i64, options: usize },
    #[error("coercion failed: {0}")]
    Coercion(#[from] CoercionError),
    #[error("difficulty {0} below 1")]
    LevelBelowMinimum(i64),
}

/// Task-type decision table keyed by team and source tag.
pub fn task_type(team: Team, tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    if team == Team::Art {
        return if tag.is_empty() {
            "art_asset".to_string()
        } else {
            format!("art_{tag}")
        };
    }

    let default = team.label().to_lowercase();
    if default == PLAYABLE_ABBREVIATION {
        PLAYABLE_TASK_TYPE.to_string()
    } else {
        default
    }
}

pub fn select_assignee(task: &RawTask, policy: AssigneePolicy) -> String {
    let index = match policy {
        AssigneePolicy::PreferSecond if task.assignees.len() > 1 => 1,
        _ => 0,
    };
    task.assignees
        .get(index)
        .and_then(|assignee| assignee.email.clone())
        .unwrap_or_default()
}

fn required<'a>(fields: &FieldMap<'a>, name: &str) -> Option<&'a CustomField> {
    fields.get(name).copied().filter(|field| !field.value.is_null())
}

pub fn classify(
    task: &RawTask,
    fields: &FieldMap<'_>,
    ctx: &ClassifyContext<'_>,
) -> Result<CompletedTask, Rejection> {
    let completion_value: &FieldValue = match ctx.completion {
        CompletionSource::DateDone => &task.date_done,
        CompletionSource::Field(name) => match fields.get(name) {
            Some(field) => &field.value,
            None => &FieldValue::Null,
        },
    };
    if completion_value.is_null() {
        return Err(Rejection::NoCompletionTimestamp);
    }
    if matches!(completion_value, FieldValue::String(s) if s.trim().is_empty()) {
        return Err(Rejection::NoCompletionTimestamp);
    }

    let done_millis = coerce_timestamp_millis(ctx.completion.name(), completion_value)?;
    let done_at = from_millis(done_millis).ok_or_else(|| {
        Rejection::Coercion(CoercionError {
            field: ctx.completion.name().to_string(),
            expected: "epoch milliseconds",
            found: done_millis.to_string(),
        })
    })?;
    if !ctx.window.contains(done_at) {
        return Err(Rejection::OutsideWindow(done_at));
    }

    let difficulty_name = difficulty_field(ctx.team.label());
    let difficulty = required(fields, &difficulty_name)
        .ok_or_else(|| Rejection::MissingDifficulty(difficulty_name.clone()))?;
    let project_field = required(fields, PROJECT_FIELD).ok_or(Rejection::MissingProject)?;

    let project = match coerce_project(project_field)? {
        ProjectSelection::Resolved(name) if !name.is_empty() => name,
        ProjectSelection::Resolved(_) => return Err(Rejection::MissingProject),
        ProjectSelection::OutOfRange { index, options } => {
            return Err(Rejection::ProjectOptionOutOfRange { index, options })
        }
    };
    let level = coerce_level(&difficulty.name, &difficulty.value)?;

    if level < 1 {
        return Err(Rejection::LevelBelowMinimum(level));
    }

    let tool_name = tool_field(ctx.team.label());
    let tool = match fields.get(tool_name.as_str()) {
        Some(field) => coerce_tools(field).unwrap_or_else(|err| {
            warn!("Ignoring tool selection on task {}: {err}", task.id);
            Vec::new()
        }),
        None => Vec::new(),
    };

    Ok(CompletedTask {
        task_id: task.id.clone(),
        task_name: task.name.clone(),
        assignee_id: select_assignee(task, ctx.assignee),
        team: ctx.team,
        task_type: task_type(ctx.team, ctx.tag),
        level,
        tool,
        project,
        done_date: ctx.bucket,
    })
}

/// Case-insensitive, whitespace-normalised display name.
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keeps the first task for every name key. Tasks whose key is empty always
/// pass through.
pub fn dedupe(tasks: Vec<CompletedTask>) -> Vec<CompletedTask> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| {
            let key = name_key(&task.task_name);
            key.is_empty() || seen.insert(key)
        })
        .collect()
}
