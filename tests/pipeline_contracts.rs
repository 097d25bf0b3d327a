use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quotasync_lib::commands::db::{
    detail_crud, get_performance_points, get_project_issues, order_crud,
};
use quotasync_lib::commands::settings::{get_settings, save_settings, PipelineSettings};
use quotasync_lib::commands::sync::SyncPipeline;
use quotasync_lib::commands::tracker::{TaskQuery, TaskSource};
use quotasync_lib::error::{PipelineError, Result};
use quotasync_lib::models::completed_task::Team;
use quotasync_lib::models::project_detail::ProjectDetail;
use quotasync_lib::models::project_issue::IssueStatus;
use quotasync_lib::models::raw_task::{ListRef, RawTask, TaskPage};
use quotasync_lib::models::weekly_order::WeeklyOrder;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;

const DONE_IN_WINDOW: &str = "1760072400000"; // 2025-10-10T05:00:00Z
const DONE_BEFORE_WINDOW: &str = "1759294800000"; // 2025-10-01T05:00:00Z

/// One list per space; tasks keyed by (space, tag filter).
#[derive(Default)]
struct MemorySource {
    tasks: HashMap<(String, String), Vec<RawTask>>,
    failing_spaces: HashSet<String>,
}

impl MemorySource {
    fn with(mut self, space: &str, tag: &str, tasks: Vec<Value>) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|task| serde_json::from_value(task).expect("raw task"))
            .collect();
        self.tasks.insert((space.to_string(), tag.to_string()), tasks);
        self
    }

    fn failing(mut self, space: &str) -> Self {
        self.failing_spaces.insert(space.to_string());
        self
    }
}

#[async_trait]
impl TaskSource for MemorySource {
    async fn list_lists(&self, space_id: &str) -> Result<Vec<ListRef>> {
        Ok(vec![ListRef {
            id: space_id.to_string(),
            name: format!("{space_id} list"),
        }])
    }

    async fn list_tasks_page(
        &self,
        list_id: &str,
        query: &TaskQuery,
        page: u32,
    ) -> Result<TaskPage> {
        if self.failing_spaces.contains(list_id) {
            let context = format!("list {list_id}");
            return Err(PipelineError::transport(context, "HTTP 502: bad gateway"));
        }
        let tag = query.tag.clone().unwrap_or_default();
        let tasks = if page == 0 {
            self.tasks
                .get(&(list_id.to_string(), tag))
                .cloned()
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(TaskPage { tasks, last_page: true })
    }
}

fn game_field() -> Value {
    json!({
        "id": "game",
        "name": "Game Name",
        "type": "drop_down",
        "value": 0,
        "type_config": { "options": [ { "id": "g0", "name": "G01 Foo", "orderindex": 0 } ] }
    })
}

fn team_task(id: &str, name: &str, label: &str, level: Value) -> Value {
    json!({
        "id": id,
        "name": name,
        "date_done": DONE_IN_WINDOW,
        "assignees": [ { "email": "first@studio" }, { "email": "second@studio" } ],
        "custom_fields": [
            { "id": "lvl", "name": format!("{label} Difficult"), "type": "number", "value": level },
            game_field(),
            {
                "id": "tool",
                "name": format!("Tool/CTST {label}"),
                "type": "labels",
                "value": ["t2"],
                "type_config": { "options": [
                    { "id": "t1", "label": "1. Spine" },
                    { "id": "t2", "label": "2. Unity" }
                ] }
            }
        ]
    })
}

fn concept_task(id: &str, name: &str, done: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "date_done": null,
        "assignees": [ { "email": "first@studio" }, { "email": "second@studio" } ],
        "custom_fields": [
            { "id": "done", "name": "Ngày tick Done Concept", "type": "date", "value": done },
            { "id": "lvl", "name": "Concept Difficult", "type": "number", "value": 2 },
            game_field()
        ]
    })
}

fn settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.spaces = HashMap::from([
        (Team::Concept, "sp-concept".to_string()),
        (Team::Playable, "sp-pla".to_string()),
        (Team::Art, "sp-art".to_string()),
        (Team::Video, "sp-video".to_string()),
    ]);
    settings
}

fn studio_source() -> MemorySource {
    MemorySource::default()
        .with(
            "sp-pla",
            "",
            vec![
                team_task("p1", "Foo level 1", "PLA", json!("3")),
                team_task("p2", "Foo level 2", "PLA", json!(2)),
                team_task("p4", "Foo level 4", "PLA", json!(0)),
            ],
        )
        .with("sp-concept", "pla", vec![team_task("p3", "foo   LEVEL 1", "PLA", json!(1))])
        .with("sp-art", "", vec![team_task("a1", "Foo key art", "Art", json!(2.0))])
        .with("sp-concept", "icon", vec![team_task("a2", "Foo icon", "Art", json!(1))])
        .with(
            "sp-concept",
            "done concept",
            vec![
                concept_task("c1", "Foo concept", DONE_IN_WINDOW),
                concept_task("c2", "Old concept", DONE_BEFORE_WINDOW),
            ],
        )
        .failing("sp-video")
}

/// 2025-10-13 23:59 +07:00, the Monday night trigger time.
fn monday_night() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 13, 16, 59, 0).unwrap()
}

/// 2025-10-13 00:00 +07:00, the order week of that run.
fn order_week() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 12, 17, 0, 0).unwrap()
}

async fn seed_orders(data_dir: &str) {
    let quotas: BTreeMap<String, i64> = [
        ("playable", 3),
        ("art_asset", 1),
        ("art_icon", 1),
        ("art_banner", 0),
        ("video", 2),
        ("concept", 1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let order = WeeklyOrder {
        project: "Foo".into(),
        start_week: order_week(),
        goal: "soft launch".into(),
        strategy: String::new(),
        quotas,
    };
    order_crud(data_dir.to_string(), "create".into(), Some(order), None, None)
        .await
        .expect("create order");

    detail_crud(
        data_dir.to_string(),
        "upsert".into(),
        Some(ProjectDetail {
            project: "Foo".into(),
            team: "Video".into(),
            assignee: "video-lead@studio".into(),
        }),
    )
    .await
    .expect("create detail");
}

fn workspace() -> (TempDir, String) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let data_dir = temp_dir.path().to_string_lossy().to_string();
    (temp_dir, data_dir)
}

#[tokio::test]
async fn full_run_ingests_every_team_and_reports_variances() {
    let (_tmp, data_dir) = workspace();
    seed_orders(&data_dir).await;

    let pipeline = SyncPipeline::new(settings(), Arc::new(studio_source()), data_dir.clone());
    let report = pipeline
        .run(&Team::ALL, monday_night())
        .await
        .expect("sync run");

    assert_eq!(report.bucket, Utc.with_ymd_and_hms(2025, 10, 13, 2, 0, 0).unwrap());
    let outcome = |label: &str| {
        report
            .teams
            .iter()
            .find(|t| t.team == label)
            .expect("team outcome")
            .clone()
    };

    let playable = outcome("PLA");
    assert_eq!(playable.fetched, 4);
    assert_eq!(playable.rejected, 1);
    assert_eq!(playable.duplicates, 1);
    assert_eq!(playable.stored, 2);
    assert_eq!(outcome("Art").stored, 2);
    assert_eq!(outcome("Concept").stored, 1);
    assert_eq!(outcome("Concept").rejected, 1);

    let video = outcome("Video");
    assert_eq!(video.stored, 0);
    assert!(video.error.as_deref().unwrap_or_default().contains("502"));

    let issues = get_project_issues(
        data_dir.clone(),
        "2025-10-12T17:00:00Z".into(),
        "2025-10-19T16:59:59Z".into(),
    )
    .await
    .expect("issues");
    assert_eq!(report.issue_count, 5);
    assert_eq!(issues.len(), 5);

    let row = |task_type: &str| {
        issues
            .iter()
            .find(|i| i.task_type == task_type)
            .expect("issue row")
            .clone()
    };
    let playable = row("playable");
    assert_eq!((playable.completed_count, playable.difference), (2, -1));
    assert_eq!(playable.status, IssueStatus::Under);
    assert_eq!(playable.assignees, vec!["second@studio".to_string()]);

    assert_eq!(row("art_asset").status, IssueStatus::Match);
    assert_eq!(row("art_icon").status, IssueStatus::Match);

    let concept = row("concept");
    assert_eq!(concept.status, IssueStatus::Match);
    assert_eq!(concept.assignees, vec!["first@studio".to_string()]);

    // The failed video branch surfaces as a shortfall, filled by the fallback lead.
    let video = row("video");
    assert_eq!((video.completed_count, video.difference), (0, -2));
    assert_eq!(video.status, IssueStatus::Under);
    assert_eq!(video.assignees, vec!["video-lead@studio".to_string()]);

    assert!(issues.iter().all(|i| i.task_type != "art_banner"));
}

#[tokio::test]
async fn rerunning_the_same_window_does_not_duplicate_tasks() {
    let (_tmp, data_dir) = workspace();
    seed_orders(&data_dir).await;
    let pipeline = SyncPipeline::new(settings(), Arc::new(studio_source()), data_dir.clone());

    let first = pipeline.run(&[Team::Playable], monday_night()).await.expect("first run");
    let second = pipeline.run(&[Team::Playable], monday_night()).await.expect("second run");
    assert_eq!(first.teams[0].stored, 2);
    assert_eq!(second.teams[0].stored, 0);

    let points = get_performance_points(
        data_dir.clone(),
        vec!["PLA".into()],
        "2025-10-12T17:00:00Z".into(),
        "2025-10-19T16:59:59Z".into(),
        true,
    )
    .await
    .expect("points");
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|t| t.tool == vec![2]));
    assert!(points.iter().all(|t| t.project == "Foo"));
}

#[tokio::test]
async fn missing_space_fails_only_that_team() {
    let (_tmp, data_dir) = workspace();
    let mut settings = settings();
    settings.spaces.remove(&Team::Art);
    let pipeline = SyncPipeline::new(settings, Arc::new(studio_source()), data_dir);

    let report = pipeline
        .run(&[Team::Art, Team::Playable], monday_night())
        .await
        .expect("sync run");
    assert!(report.teams[0].error.as_deref().unwrap_or_default().contains("art"));
    assert_eq!(report.teams[1].stored, 2);
    assert_eq!(report.issue_count, 0);
}

#[tokio::test]
async fn order_crud_contract() {
    let (_tmp, data_dir) = workspace();
    seed_orders(&data_dir).await;

    let read = order_crud(
        data_dir.clone(),
        "read".into(),
        None,
        Some("Foo".into()),
        Some("2025-10-12T17:00:00Z".into()),
    )
    .await
    .expect("read order");
    assert_eq!(read["quotas"]["playable"], 3);

    let mut updated: WeeklyOrder = serde_json::from_value(read).expect("order");
    updated.quotas.insert("playable".into(), 5);
    let status = order_crud(data_dir.clone(), "update".into(), Some(updated), None, None)
        .await
        .expect("update order");
    assert_eq!(status["status"], "updated");

    let listed = order_crud(data_dir.clone(), "list".into(), None, None, None)
        .await
        .expect("list orders");
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["quotas"]["playable"], 5);

    let err = order_crud(data_dir.clone(), "explode".into(), None, None, None)
        .await
        .expect_err("unknown operation");
    assert!(err.contains("Unknown operation"));

    order_crud(
        data_dir.clone(),
        "delete".into(),
        None,
        Some("Foo".into()),
        Some("2025-10-12T17:00:00Z".into()),
    )
    .await
    .expect("delete order");
    let listed = order_crud(data_dir, "list".into(), None, None, None)
        .await
        .expect("list orders");
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn settings_commands_round_trip_and_merge_partial_updates() {
    let (_tmp, data_dir) = workspace();

    let initial = get_settings(data_dir.clone()).await.expect("load settings");
    assert_eq!(initial["timezone"], "Asia/Ho_Chi_Minh");
    assert_eq!(initial["schedules"].as_array().map(Vec::len), Some(2));

    let saved = save_settings(
        data_dir.clone(),
        json!({ "minElapsedDays": 40, "spaces": { "art": "sp-art" } }),
    )
    .await
    .expect("save settings");
    assert_eq!(saved["minElapsedDays"], 6);
    assert_eq!(saved["spaces"]["art"], "sp-art");
    assert_eq!(saved["spaces"]["video"], "");

    let reloaded = get_settings(data_dir).await.expect("reload settings");
    assert_eq!(reloaded, saved);
}
