use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamOutcome {
    pub team: String,
    pub fetched: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub stored: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub bucket: DateTime<Utc>,
    pub teams: Vec<TeamOutcome>,
    pub issue_count: usize,
    pub duration_ms: u64,
}
