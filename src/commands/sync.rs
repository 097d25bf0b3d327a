use crate::analysis::classify::{
    classify, dedupe, AssigneePolicy, ClassifyContext, CompletionSource, PLAYABLE_ABBREVIATION,
};
use crate::analysis::fields::{index, CONCEPT_DONE_FIELD};
use crate::analysis::window::{bucket_week, current_window, representative_bucket, TimeWindow};
use crate::commands::db::{
    get_db_connection, insert_completed_tasks, query_project_issues, save_project_issues,
};
use crate::commands::settings::{load_pipeline_settings, PipelineSettings, TOKEN_ENV};
use crate::commands::tracker::{fetch_space, ClickUpClient, TaskQuery, TaskSource};
use crate::error::{PipelineError, Result};
use crate::models::completed_task::{CompletedTask, Team};
use crate::models::project_issue::ProjectIssue;
use crate::models::sync_report::{SyncReport, TeamOutcome};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

pub const CONCEPT_DONE_TAG: &str = "done concept";
pub const CPP_TAG: &str = "cpp";
pub const ICON_TAG: &str = "icon";
pub const BANNER_TAG: &str = "banner";
pub const VIDEO_TAG: &str = "vid";

/// One tracker fetch feeding a team's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpec {
    /// Whose space the tasks are read from.
    pub space: Team,
    pub tag: &'static str,
    pub completed_only: bool,
    pub completion: CompletionSource,
    pub assignee: AssigneePolicy,
}

impl SourceSpec {
    fn completed(space: Team, tag: &'static str) -> Self {
        Self {
            space,
            tag,
            completed_only: true,
            completion: CompletionSource::DateDone,
            assignee: AssigneePolicy::PreferSecond,
        }
    }

    /// `date_done_gt` is strict, so the lower bound sits one millisecond
    /// before the inclusive window start.
    fn query(&self, window: &TimeWindow) -> TaskQuery {
        let windowed = self.completion == CompletionSource::DateDone;
        TaskQuery {
            completed_only: self.completed_only,
            tag: (!self.tag.is_empty()).then(|| self.tag.to_string()),
            include_subtasks: true,
            done_after_ms: windowed.then(|| window.start_millis() - 1),
            done_before_ms: windowed.then(|| window.end_millis()),
        }
    }
}

/// Sources merged into one team's batch, in merge order.
pub fn team_sources(team: Team) -> Vec<SourceSpec> {
    match team {
        Team::Concept => vec![SourceSpec {
            space: Team::Concept,
            tag: CONCEPT_DONE_TAG,
            completed_only: false,
            completion: CompletionSource::Field(CONCEPT_DONE_FIELD),
            assignee: AssigneePolicy::First,
        }],
        Team::Playable => vec![
            SourceSpec::completed(Team::Playable, ""),
            SourceSpec::completed(Team::Concept, PLAYABLE_ABBREVIATION),
        ],
        Team::Art => vec![
            SourceSpec::completed(Team::Art, ""),
            SourceSpec::completed(Team::Concept, CPP_TAG),
            SourceSpec::completed(Team::Concept, ICON_TAG),
            SourceSpec::completed(Team::Concept, BANNER_TAG),
        ],
        Team::Video => vec![
            SourceSpec::completed(Team::Video, ""),
            SourceSpec::completed(Team::Concept, VIDEO_TAG),
        ],
    }
}

#[derive(Debug, Default)]
struct TeamBatch {
    tasks: Vec<CompletedTask>,
    fetched: usize,
    rejected: usize,
    duplicates: usize,
}

async fn collect_team(
    source: Arc<dyn TaskSource>,
    settings: Arc<PipelineSettings>,
    team: Team,
    window: TimeWindow,
    bucket: DateTime<Utc>,
) -> Result<TeamBatch> {
    let mut batch = TeamBatch::default();
    let mut merged = Vec::new();

    for spec in team_sources(team) {
        let space_id = settings.space(spec.space).ok_or_else(|| {
            PipelineError::Config(format!(
                "No tracker space configured for {}",
                spec.space.key()
            ))
        })?;

        let raw = fetch_space(source.as_ref(), space_id, &spec.query(&window)).await?;
        debug!("[{team}] space {space_id} tag {:?}: {} tasks", spec.tag, raw.len());
        batch.fetched += raw.len();

        let ctx = ClassifyContext {
            team,
            tag: spec.tag,
            window,
            bucket,
            completion: spec.completion,
            assignee: spec.assignee,
        };
        for task in &raw {
            let fields = index(task);
            match classify(task, &fields, &ctx) {
                Ok(completed) => merged.push(completed),
                Err(reason) => {
                    batch.rejected += 1;
                    warn!("[{team}] skip task id={} name={:?}: {reason}", task.id, task.name);
                }
            }
        }
    }

    let before = merged.len();
    batch.tasks = dedupe(merged);
    batch.duplicates = before - batch.tasks.len();
    Ok(batch)
}

pub struct SyncPipeline {
    settings: PipelineSettings,
    source: Arc<dyn TaskSource>,
    data_dir: String,
}

impl SyncPipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Arc<dyn TaskSource>,
        data_dir: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            source,
            data_dir: data_dir.into(),
        }
    }

    /// Settings from the data directory, the tracker token from the environment.
    pub fn from_env(data_dir: &str) -> Result<Self> {
        let settings = load_pipeline_settings(data_dir).map_err(PipelineError::Config)?;
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PipelineError::Config(format!("{TOKEN_ENV} is not set")))?;
        let client = ClickUpClient::new(
            &settings.tracker_base_url,
            &token,
            Duration::from_secs(settings.http_timeout_secs),
        )?;
        Ok(Self::new(settings, Arc::new(client), data_dir))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Fetches, classifies and stores every requested team concurrently, then
    /// reconciles the run's bucket week. A failed team branch is logged and
    /// reported; it never stops the other teams.
    pub async fn run(&self, teams: &[Team], reference: DateTime<Utc>) -> Result<SyncReport> {
        let started = Instant::now();
        let zone = self.settings.window.zone;
        let window = current_window(reference, &self.settings.window);
        let bucket = representative_bucket(window.last_instant(), &zone);

        let mut requested: Vec<Team> = Vec::new();
        for team in teams {
            if !requested.contains(team) {
                requested.push(*team);
            }
        }
        info!(
            "Sync {:?} window [{}, {}) bucket {}",
            requested.iter().map(|t| t.label()).collect::<Vec<_>>(),
            window.start.to_rfc3339(),
            window.end.to_rfc3339(),
            bucket.to_rfc3339()
        );

        let settings = Arc::new(self.settings.clone());
        let mut branches = JoinSet::new();
        for team in &requested {
            let source = Arc::clone(&self.source);
            let settings = Arc::clone(&settings);
            let team = *team;
            branches.spawn(async move {
                let batch = collect_team(source, settings, team, window, bucket).await;
                (team, batch)
            });
        }

        let mut settled: HashMap<Team, Result<TeamBatch>> = HashMap::new();
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((team, result)) => {
                    settled.insert(team, result);
                }
                Err(e) => error!("Team sync task failed to complete: {e}"),
            }
        }

        let conn = get_db_connection(&self.data_dir)?;
        let mut outcomes = Vec::with_capacity(requested.len());
        let mut persistence_failure = None;

        for team in &requested {
            let mut outcome = TeamOutcome {
                team: team.label().to_string(),
                ..TeamOutcome::default()
            };
            match settled.remove(team) {
                Some(Ok(batch)) => {
                    outcome.fetched = batch.fetched;
                    outcome.rejected = batch.rejected;
                    outcome.duplicates = batch.duplicates;
                    match insert_completed_tasks(&conn, &batch.tasks) {
                        Ok(stored) => {
                            outcome.stored = stored;
                            info!(
                                "[{team}] fetched {} rejected {} duplicates {} stored {stored}",
                                batch.fetched, batch.rejected, batch.duplicates
                            );
                        }
                        Err(e) => {
                            error!("[{team}] failed to store completed tasks: {e}");
                            outcome.error = Some(format!("Persistence error: {e}"));
                            if persistence_failure.is_none() {
                                persistence_failure = Some(e);
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("[{team}] sync failed: {e}");
                    outcome.error = Some(e.to_string());
                }
                None => outcome.error = Some("sync task aborted".to_string()),
            }
            outcomes.push(outcome);
        }

        if let Some(e) = persistence_failure {
            return Err(PipelineError::Persistence(e));
        }

        let (start, end) = bucket_week(bucket, &zone);
        let issues = query_project_issues(&conn, start, end)?;
        save_project_issues(&conn, &issues)?;
        info!("Reconciled {} project issues for week of {}", issues.len(), start.to_rfc3339());

        Ok(SyncReport {
            window_start: window.start,
            window_end: window.end,
            bucket,
            teams: outcomes,
            issue_count: issues.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Reconciles an explicit inclusive range and persists the resulting rows.
pub async fn reconcile_range(
    data_dir: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> std::result::Result<Vec<ProjectIssue>, String> {
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;
    let issues = query_project_issues(&conn, start, end).map_err(|e| format!("Query error: {e}"))?;
    save_project_issues(&conn, &issues).map_err(|e| format!("Save error: {e}"))?;
    Ok(issues)
}
