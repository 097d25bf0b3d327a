use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueStatus {
    Over,
    Under,
    Match,
}

impl IssueStatus {
    pub fn from_difference(difference: i64) -> Self {
        match difference {
            d if d > 0 => IssueStatus::Over,
            d if d < 0 => IssueStatus::Under,
            _ => IssueStatus::Match,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Over => "OVER",
            IssueStatus::Under => "UNDER",
            IssueStatus::Match => "MATCH",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OVER" => Some(IssueStatus::Over),
            "UNDER" => Some(IssueStatus::Under),
            "MATCH" => Some(IssueStatus::Match),
            _ => None,
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectIssue {
    pub project: String,
    pub start_week: DateTime<Utc>,
    pub task_type: String,
    pub team: Option<String>,
    pub order_count: i64,
    pub completed_count: i64,
    pub assignees: Vec<String>,
    pub difference: i64,
    pub status: IssueStatus,
    pub note: Option<String>,
}
