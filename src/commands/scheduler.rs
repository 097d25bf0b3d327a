use crate::analysis::window::WindowZone;
use crate::commands::settings::WeeklyTrigger;
use crate::commands::sync::SyncPipeline;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use log::{error, info};
use std::sync::Arc;

pub struct Scheduler {
    pipeline: Arc<SyncPipeline>,
    triggers: Vec<WeeklyTrigger>,
}

/// Next local occurrence of the trigger's weekday and time strictly after `now`.
pub fn next_fire(
    trigger: &WeeklyTrigger,
    now: DateTime<Utc>,
    zone: &WindowZone,
) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(trigger.hour, trigger.minute, 0)?;
    let today = zone.local(now).date();
    (0..=7)
        .map(|offset| today + Duration::days(offset))
        .filter(|date| date.weekday() == trigger.weekday)
        .map(|date| zone.instant(date.and_time(time)))
        .find(|candidate| *candidate > now)
}

/// Earliest upcoming fire time and every trigger due at that instant.
pub fn due_triggers<'a>(
    triggers: &'a [WeeklyTrigger],
    now: DateTime<Utc>,
    zone: &WindowZone,
) -> Option<(DateTime<Utc>, Vec<&'a WeeklyTrigger>)> {
    let upcoming: Vec<_> = triggers
        .iter()
        .filter_map(|t| next_fire(t, now, zone).map(|at| (at, t)))
        .collect();
    let earliest = upcoming.iter().map(|(at, _)| *at).min()?;
    let due = upcoming
        .into_iter()
        .filter(|(at, _)| *at == earliest)
        .map(|(_, t)| t)
        .collect();
    Some((earliest, due))
}

impl Scheduler {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        let triggers = pipeline.settings().schedules.clone();
        Self { pipeline, triggers }
    }

    /// Sleeps until the next trigger, runs every trigger due at that instant,
    /// and repeats. Returns only when no trigger is configured.
    pub async fn run(self) -> Result<()> {
        if self.triggers.is_empty() {
            return Err(PipelineError::Config("No schedules configured".to_string()));
        }
        let zone = self.pipeline.settings().window.zone;

        loop {
            let now = Utc::now();
            let Some((at, due)) = due_triggers(&self.triggers, now, &zone) else {
                return Err(PipelineError::Config("No schedule can fire".to_string()));
            };
            let names: Vec<_> = due.iter().map(|t| t.name.as_str()).collect();
            info!("Next sync at {} for {:?}", at.to_rfc3339(), names);

            let wait = (at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            for trigger in due {
                match self.pipeline.run(&trigger.teams, Utc::now()).await {
                    Ok(report) => info!(
                        "Schedule {} finished in {} ms: {} issues",
                        trigger.name, report.duration_ms, report.issue_count
                    ),
                    Err(e) => error!("Schedule {} failed: {e}", trigger.name),
                }
            }
        }
    }
}
