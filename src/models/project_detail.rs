use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fallback assignee for a project/team pair, used when no completed task
/// names anyone for an issue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub project: String,
    pub team: String,
    pub assignee: String,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackAssignees {
    by_project_team: HashMap<(String, String), String>,
}

impl FallbackAssignees {
    pub fn from_details(details: &[ProjectDetail]) -> Self {
        let by_project_team = details
            .iter()
            .filter(|d| !d.assignee.trim().is_empty())
            .map(|d| ((d.project.clone(), d.team.clone()), d.assignee.clone()))
            .collect();
        Self { by_project_team }
    }

    pub fn lookup(&self, project: &str, team: &str) -> Option<&str> {
        self.by_project_team
            .get(&(project.to_string(), team.to_string()))
            .map(String::as_str)
    }
}
