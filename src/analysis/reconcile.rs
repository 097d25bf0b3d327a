use crate::models::completed_task::{CompletedTask, Team};
use crate::models::project_detail::FallbackAssignees;
use crate::models::project_issue::{IssueStatus, ProjectIssue};
use crate::models::weekly_order::WeeklyOrder;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Per (project, task-type) aggregate before fallbacks and status are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaTally {
    pub project: String,
    pub start_week: DateTime<Utc>,
    pub task_type: String,
    pub order_count: i64,
    pub completed_count: i64,
    pub assignees: BTreeSet<String>,
}

/// Turns a tally into a report row. Rows without a positive quota are
/// dropped.
pub fn finalize(tally: QuotaTally, fallbacks: &FallbackAssignees) -> Option<ProjectIssue> {
    if tally.order_count <= 0 {
        return None;
    }

    let team = Team::for_task_type(&tally.task_type).map(|team| team.label().to_string());
    let mut assignees: Vec<String> = tally.assignees.into_iter().collect();
    if assignees.is_empty() {
        if let Some(fallback) = team
            .as_deref()
            .and_then(|team| fallbacks.lookup(&tally.project, team))
        {
            assignees.push(fallback.to_string());
        }
    }

    let difference = tally.completed_count - tally.order_count;
    Some(ProjectIssue {
        project: tally.project,
        start_week: tally.start_week,
        task_type: tally.task_type,
        team,
        order_count: tally.order_count,
        completed_count: tally.completed_count,
        assignees,
        difference,
        status: IssueStatus::from_difference(difference),
        note: None,
    })
}

fn in_range(instant: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= instant && instant <= end
}

/// Compares the quotas of every order starting in `[start, end]` with the
/// completed tasks bucketed in the same range. Quotas for the same project
/// and task-type are summed and stamped with the earliest order week.
pub fn reconcile(
    orders: &[WeeklyOrder],
    tasks: &[CompletedTask],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    fallbacks: &FallbackAssignees,
) -> Vec<ProjectIssue> {
    let mut tallies: BTreeMap<(String, String), QuotaTally> = BTreeMap::new();

    for order in orders.iter().filter(|o| in_range(o.start_week, start, end)) {
        for (task_type, quota) in &order.quotas {
            let tally = tallies
                .entry((order.project.clone(), task_type.clone()))
                .or_insert_with(|| QuotaTally {
                    project: order.project.clone(),
                    start_week: order.start_week,
                    task_type: task_type.clone(),
                    order_count: 0,
                    completed_count: 0,
                    assignees: BTreeSet::new(),
                });
            tally.order_count += quota;
            tally.start_week = tally.start_week.min(order.start_week);
        }
    }

    for task in tasks.iter().filter(|t| in_range(t.done_date, start, end)) {
        if let Some(tally) = tallies.get_mut(&(task.project.clone(), task.task_type.clone())) {
            tally.completed_count += 1;
            if !task.assignee_id.is_empty() {
                tally.assignees.insert(task.assignee_id.clone());
            }
        }
    }

    tallies
        .into_values()
        .filter_map(|tally| finalize(tally, fallbacks))
        .collect()
}
