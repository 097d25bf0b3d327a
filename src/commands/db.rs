use crate::analysis::reconcile::{finalize, QuotaTally};
use crate::commands::settings::{ensure_state_dir, state_dir};
use crate::error::PipelineError;
use crate::models::completed_task::{CompletedTask, Team};
use crate::models::project_detail::{FallbackAssignees, ProjectDetail};
use crate::models::project_issue::{IssueStatus, ProjectIssue};
use crate::models::weekly_order::WeeklyOrder;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::BTreeSet;

const DB_SCHEMA_VERSION: i64 = 2;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        // Future schema; do not fail reads/writes for forward-compatible changes.
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS completed_tasks (
            task_id TEXT NOT NULL,
            task_name TEXT NOT NULL,
            assignee_id TEXT NOT NULL DEFAULT '',
            team TEXT NOT NULL,
            task_type TEXT NOT NULL,
            level INTEGER NOT NULL CHECK(level >= 1),
            tools_json TEXT NOT NULL DEFAULT '[]',
            project TEXT NOT NULL CHECK(project <> ''),
            done_date INTEGER NOT NULL,
            PRIMARY KEY (task_id, task_type, done_date)
        );

        CREATE TABLE IF NOT EXISTS weekly_orders (
            project TEXT NOT NULL,
            start_week INTEGER NOT NULL,
            goal TEXT NOT NULL DEFAULT '',
            strategy TEXT NOT NULL DEFAULT '',
            quotas_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (project, start_week)
        );

        CREATE TABLE IF NOT EXISTS project_details (
            project TEXT NOT NULL,
            team TEXT NOT NULL,
            assignee TEXT NOT NULL,
            PRIMARY KEY (project, team)
        );

        CREATE TABLE IF NOT EXISTS project_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project TEXT NOT NULL,
            start_week INTEGER NOT NULL,
            task_type TEXT NOT NULL,
            team TEXT,
            order_count INTEGER NOT NULL,
            completed_count INTEGER NOT NULL,
            assignees_json TEXT NOT NULL DEFAULT '[]',
            difference INTEGER NOT NULL,
            status TEXT CHECK(status IN ('OVER', 'UNDER', 'MATCH')) NOT NULL,
            note TEXT,
            UNIQUE (project, start_week, task_type)
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_completed_tasks_lookup
            ON completed_tasks(project, task_type, done_date);
        CREATE INDEX IF NOT EXISTS idx_completed_tasks_assignee
            ON completed_tasks(assignee_id, done_date);
        CREATE INDEX IF NOT EXISTS idx_weekly_orders_start_week ON weekly_orders(start_week);
        CREATE INDEX IF NOT EXISTS idx_project_issues_start_week ON project_issues(start_week);
        ",
    )
}

pub fn get_db_connection(data_dir: &str) -> std::result::Result<Connection, PipelineError> {
    ensure_state_dir(data_dir).map_err(PipelineError::Config)?;
    let conn = Connection::open(state_dir(data_dir).join("state.db"))?;
    initialize_schema(&conn)?;
    Ok(conn)
}

fn millis_at(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ---- completed tasks ---------------------------------------------------

/// Bulk insert in one transaction. Rows already stored for the same task,
/// task-type and bucket are left untouched; returns how many were new.
pub fn insert_completed_tasks(conn: &Connection, tasks: &[CompletedTask]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO completed_tasks (
                task_id, task_name, assignee_id, team, task_type,
                level, tools_json, project, done_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for task in tasks {
            let tools_json = serde_json::to_string(&task.tool).unwrap_or_else(|_| "[]".to_string());
            inserted += stmt.execute(params![
                task.task_id,
                task.task_name,
                task.assignee_id,
                task.team.label(),
                task.task_type,
                task.level,
                tools_json,
                task.project,
                task.done_date.timestamp_millis(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

const COMPLETED_COLUMNS: &str =
    "task_id, task_name, assignee_id, team, task_type, level, tools_json, project, done_date";

fn completed_from_row(row: &Row<'_>) -> Result<CompletedTask> {
    let team: String = row.get(3)?;
    let team = team
        .parse::<Team>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    Ok(CompletedTask {
        task_id: row.get(0)?,
        task_name: row.get(1)?,
        assignee_id: row.get(2)?,
        team,
        task_type: row.get(4)?,
        level: row.get(5)?,
        tool: json_at(row, 6)?,
        project: row.get(7)?,
        done_date: millis_at(row, 8)?,
    })
}

/// Completion records for assignees (or, with `by_team`, team labels) in a
/// date range.
pub fn completed_tasks_for(
    conn: &Connection,
    identifiers: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    by_team: bool,
) -> Result<Vec<CompletedTask>> {
    let column = if by_team { "team" } else { "assignee_id" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMPLETED_COLUMNS} FROM completed_tasks
         WHERE {column} = ?1 AND done_date BETWEEN ?2 AND ?3
         ORDER BY done_date, task_id"
    ))?;

    let mut out = Vec::new();
    for id in identifiers {
        let rows = stmt.query_map(
            params![id, start.timestamp_millis(), end.timestamp_millis()],
            completed_from_row,
        )?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

// ---- weekly orders -----------------------------------------------------

const ORDER_COLUMNS: &str = "project, start_week, goal, strategy, quotas_json";

fn order_from_row(row: &Row<'_>) -> Result<WeeklyOrder> {
    Ok(WeeklyOrder {
        project: row.get(0)?,
        start_week: millis_at(row, 1)?,
        goal: row.get(2)?,
        strategy: row.get(3)?,
        quotas: json_at(row, 4)?,
    })
}

pub fn insert_weekly_order(conn: &Connection, order: &WeeklyOrder) -> Result<()> {
    let quotas_json = serde_json::to_string(&order.quotas).unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        "INSERT INTO weekly_orders (project, start_week, goal, strategy, quotas_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            order.project,
            order.start_week.timestamp_millis(),
            order.goal,
            order.strategy,
            quotas_json
        ],
    )?;
    Ok(())
}

/// Updates the order matching project and start week; returns rows touched.
pub fn update_weekly_order(conn: &Connection, order: &WeeklyOrder) -> Result<usize> {
    let quotas_json = serde_json::to_string(&order.quotas).unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        "UPDATE weekly_orders SET goal = ?3, strategy = ?4, quotas_json = ?5
         WHERE project = ?1 AND start_week = ?2",
        params![
            order.project,
            order.start_week.timestamp_millis(),
            order.goal,
            order.strategy,
            quotas_json
        ],
    )
}

pub fn load_weekly_order(
    conn: &Connection,
    project: &str,
    start_week: DateTime<Utc>,
) -> Result<Option<WeeklyOrder>> {
    conn.query_row(
        &format!(
            "SELECT {ORDER_COLUMNS} FROM weekly_orders WHERE project = ?1 AND start_week = ?2"
        ),
        params![project, start_week.timestamp_millis()],
        order_from_row,
    )
    .optional()
}

pub fn load_weekly_orders(
    conn: &Connection,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<WeeklyOrder>> {
    let (start, end) = range
        .map(|(s, e)| (s.timestamp_millis(), e.timestamp_millis()))
        .unwrap_or((i64::MIN, i64::MAX));
    let mut stmt = conn.prepare(&format!(
        "SELECT {ORDER_COLUMNS} FROM weekly_orders
         WHERE start_week BETWEEN ?1 AND ?2
         ORDER BY start_week DESC, project"
    ))?;
    let rows = stmt.query_map(params![start, end], order_from_row)?;
    rows.collect()
}

pub fn delete_weekly_order(
    conn: &Connection,
    project: &str,
    start_week: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        "DELETE FROM weekly_orders WHERE project = ?1 AND start_week = ?2",
        params![project, start_week.timestamp_millis()],
    )
}

pub fn order_projects_in_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT project FROM weekly_orders
         WHERE start_week BETWEEN ?1 AND ?2
         ORDER BY project",
    )?;
    let rows = stmt.query_map(
        params![start.timestamp_millis(), end.timestamp_millis()],
        |row| row.get(0),
    )?;
    rows.collect()
}

// ---- project details ---------------------------------------------------

pub fn upsert_project_detail(conn: &Connection, detail: &ProjectDetail) -> Result<()> {
    conn.execute(
        "INSERT INTO project_details (project, team, assignee) VALUES (?1, ?2, ?3)
         ON CONFLICT(project, team) DO UPDATE SET assignee = excluded.assignee",
        params![detail.project, detail.team, detail.assignee],
    )?;
    Ok(())
}

pub fn load_project_details(conn: &Connection) -> Result<Vec<ProjectDetail>> {
    let mut stmt =
        conn.prepare("SELECT project, team, assignee FROM project_details ORDER BY project, team")?;
    let rows = stmt.query_map([], |row| {
        Ok(ProjectDetail {
            project: row.get(0)?,
            team: row.get(1)?,
            assignee: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn delete_project_detail(conn: &Connection, project: &str, team: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM project_details WHERE project = ?1 AND team = ?2",
        params![project, team],
    )
}

// ---- reconciliation ----------------------------------------------------

/// Unwinds every order's quotas, groups them per project and task-type, and
/// joins the completed tasks bucketed in `[start, end]`.
pub fn query_quota_tallies(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<QuotaTally>> {
    let mut stmt = conn.prepare(
        "
        WITH quotas AS (
            SELECT o.project AS project,
                   q.key AS task_type,
                   SUM(q.value) AS order_count,
                   MIN(o.start_week) AS start_week
            FROM weekly_orders o, json_each(o.quotas_json) q
            WHERE o.start_week BETWEEN ?1 AND ?2
            GROUP BY o.project, q.key
        )
        SELECT qa.project,
               qa.start_week,
               qa.task_type,
               qa.order_count,
               (SELECT COUNT(*) FROM completed_tasks c
                 WHERE c.project = qa.project
                   AND c.task_type = qa.task_type
                   AND c.done_date BETWEEN ?1 AND ?2) AS completed_count,
               (SELECT json_group_array(DISTINCT c.assignee_id) FROM completed_tasks c
                 WHERE c.project = qa.project
                   AND c.task_type = qa.task_type
                   AND c.done_date BETWEEN ?1 AND ?2
                   AND c.assignee_id <> '') AS assignees_json
        FROM quotas qa
        ORDER BY qa.project, qa.task_type
        ",
    )?;

    let rows = stmt.query_map(
        params![start.timestamp_millis(), end.timestamp_millis()],
        |row| {
            let assignees: Vec<String> = json_at(row, 5)?;
            Ok(QuotaTally {
                project: row.get(0)?,
                start_week: millis_at(row, 1)?,
                task_type: row.get(2)?,
                order_count: row.get(3)?,
                completed_count: row.get(4)?,
                assignees: assignees.into_iter().collect::<BTreeSet<_>>(),
            })
        },
    )?;
    rows.collect()
}

pub fn query_project_issues(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ProjectIssue>> {
    let fallbacks = FallbackAssignees::from_details(&load_project_details(conn)?);
    Ok(query_quota_tallies(conn, start, end)?
        .into_iter()
        .filter_map(|tally| finalize(tally, &fallbacks))
        .collect())
}

/// Upserts report rows; a note already attached to a row is kept.
pub fn save_project_issues(conn: &Connection, issues: &[ProjectIssue]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO project_issues (
                project, start_week, task_type, team, order_count, completed_count,
                assignees_json, difference, status, note
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(project, start_week, task_type) DO UPDATE SET
                team = excluded.team,
                order_count = excluded.order_count,
                completed_count = excluded.completed_count,
                assignees_json = excluded.assignees_json,
                difference = excluded.difference,
                status = excluded.status,
                note = COALESCE(excluded.note, project_issues.note)",
        )?;
        for issue in issues {
            let assignees_json =
                serde_json::to_string(&issue.assignees).unwrap_or_else(|_| "[]".to_string());
            stmt.execute(params![
                issue.project,
                issue.start_week.timestamp_millis(),
                issue.task_type,
                issue.team,
                issue.order_count,
                issue.completed_count,
                assignees_json,
                issue.difference,
                issue.status.as_str(),
                issue.note,
            ])?;
        }
    }
    tx.commit()
}

pub fn set_issue_note(
    conn: &Connection,
    project: &str,
    start_week: DateTime<Utc>,
    task_type: &str,
    note: Option<&str>,
) -> Result<usize> {
    conn.execute(
        "UPDATE project_issues SET note = ?4
         WHERE project = ?1 AND start_week = ?2 AND task_type = ?3",
        params![project, start_week.timestamp_millis(), task_type, note],
    )
}

pub fn load_project_issues(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ProjectIssue>> {
    let mut stmt = conn.prepare(
        "SELECT project, start_week, task_type, team, order_count, completed_count,
                assignees_json, difference, status, note
         FROM project_issues
         WHERE start_week BETWEEN ?1 AND ?2
         ORDER BY project, task_type",
    )?;
    let rows = stmt.query_map(
        params![start.timestamp_millis(), end.timestamp_millis()],
        |row| {
            let status: String = row.get(8)?;
            let status = IssueStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    Type::Text,
                    format!("unknown status {status}").into(),
                )
            })?;
            Ok(ProjectIssue {
                project: row.get(0)?,
                start_week: millis_at(row, 1)?,
                task_type: row.get(2)?,
                team: row.get(3)?,
                order_count: row.get(4)?,
                completed_count: row.get(5)?,
                assignees: json_at(row, 6)?,
                difference: row.get(7)?,
                status,
                note: row.get(9)?,
            })
        },
    )?;
    rows.collect()
}

// ---- command surface ---------------------------------------------------

pub(crate) fn parse_instant(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid RFC 3339 timestamp {raw}: {e}"))
}

pub async fn order_crud(
    data_dir: String,
    operation: String,
    item: Option<WeeklyOrder>,
    project: Option<String>,
    start_week: Option<String>,
) -> std::result::Result<serde_json::Value, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;

    match operation.as_str() {
        "create" => {
            let item = item.ok_or("Item required for create")?;
            insert_weekly_order(&conn, &item).map_err(|e| format!("Insert error: {e}"))?;
            Ok(serde_json::json!({"status": "created", "project": item.project}))
        }
        "update" => {
            let item = item.ok_or("Item required for update")?;
            let touched =
                update_weekly_order(&conn, &item).map_err(|e| format!("Update error: {e}"))?;
            if touched == 0 {
                return Err(format!(
                    "No order for {} at {}",
                    item.project,
                    item.start_week.to_rfc3339()
                ));
            }
            Ok(serde_json::json!({"status": "updated", "project": item.project}))
        }
        "read" => {
            let project = project.ok_or("Project required for read")?;
            let start_week = parse_instant(&start_week.ok_or("start_week required for read")?)?;
            let order = load_weekly_order(&conn, &project, start_week)
                .map_err(|e| format!("Read error: {e}"))?;
            Ok(serde_json::to_value(order).unwrap_or(serde_json::Value::Null))
        }
        "list" => {
            let orders = load_weekly_orders(&conn, None).map_err(|e| format!("Query error: {e}"))?;
            Ok(serde_json::to_value(orders).unwrap_or_default())
        }
        "delete" => {
            let project = project.ok_or("Project required for delete")?;
            let start_week = parse_instant(&start_week.ok_or("start_week required for delete")?)?;
            delete_weekly_order(&conn, &project, start_week)
                .map_err(|e| format!("Delete error: {e}"))?;
            Ok(serde_json::json!({"status": "deleted"}))
        }
        _ => Err(format!("Unknown operation: {operation}")),
    }
}

pub async fn detail_crud(
    data_dir: String,
    operation: String,
    item: Option<ProjectDetail>,
) -> std::result::Result<serde_json::Value, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;

    match operation.as_str() {
        "upsert" => {
            let item = item.ok_or("Item required for upsert")?;
            upsert_project_detail(&conn, &item).map_err(|e| format!("Upsert error: {e}"))?;
            Ok(serde_json::json!({"status": "saved", "project": item.project, "team": item.team}))
        }
        "list" => {
            let details = load_project_details(&conn).map_err(|e| format!("Query error: {e}"))?;
            Ok(serde_json::to_value(details).unwrap_or_default())
        }
        "delete" => {
            let item = item.ok_or("Item required for delete")?;
            delete_project_detail(&conn, &item.project, &item.team)
                .map_err(|e| format!("Delete error: {e}"))?;
            Ok(serde_json::json!({"status": "deleted"}))
        }
        _ => Err(format!("Unknown operation: {operation}")),
    }
}

pub async fn get_project_issues(
    data_dir: String,
    start: String,
    end: String,
) -> std::result::Result<Vec<ProjectIssue>, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;
    load_project_issues(&conn, parse_instant(&start)?, parse_instant(&end)?)
        .map_err(|e| format!("Query error: {e}"))
}

pub async fn get_performance_points(
    data_dir: String,
    identifiers: Vec<String>,
    start: String,
    end: String,
    by_team: bool,
) -> std::result::Result<Vec<CompletedTask>, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;
    completed_tasks_for(&conn, &identifiers, parse_instant(&start)?, parse_instant(&end)?, by_team)
        .map_err(|e| format!("Query error: {e}"))
}

pub async fn get_order_projects(
    data_dir: String,
    start: String,
    end: String,
) -> std::result::Result<Vec<String>, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;
    order_projects_in_range(&conn, parse_instant(&start)?, parse_instant(&end)?)
        .map_err(|e| format!("Query error: {e}"))
}

pub async fn update_issue_note(
    data_dir: String,
    project: String,
    start_week: String,
    task_type: String,
    note: Option<String>,
) -> std::result::Result<serde_json::Value, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;
    let start = parse_instant(&start_week)?;
    let touched = set_issue_note(&conn, &project, start, &task_type, note.as_deref())
        .map_err(|e| format!("Update error: {e}"))?;
    if touched == 0 {
        return Err(format!("No issue for {project} {task_type} at {start_week}"));
    }
    Ok(serde_json::json!({"status": "updated"}))
}
