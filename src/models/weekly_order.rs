use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Externally supplied quotas for one project and week, keyed by task-type
/// (`art_cpp`, `art_icon`, `art_banner`, `playable`, `video`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyOrder {
    pub project: String,
    pub start_week: DateTime<Utc>,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub quotas: BTreeMap<String, i64>,
}
