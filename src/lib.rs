pub mod analysis;
pub mod cli;
pub mod commands;
pub mod error;
pub mod models;

use chrono::{DateTime, Utc};
use clap::Parser;
use cli::{Cli, Commands, DetailAction, IssueAction, OrderAction};
use commands::{
    db::{
        detail_crud, get_order_projects, get_performance_points, get_project_issues, order_crud,
        parse_instant, update_issue_note,
    },
    scheduler::Scheduler,
    settings::{get_settings, save_settings},
    sync::{reconcile_range, SyncPipeline},
};
use log::error;
use models::completed_task::Team;
use models::project_detail::ProjectDetail;
use models::weekly_order::WeeklyOrder;
use serde::Serialize;
use std::sync::Arc;

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(execute(cli)) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("Serialize error: {e}"))?;
    println!("{text}");
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in {path}: {e}"))
}

fn parse_teams(raw: &[String]) -> Result<Vec<Team>, String> {
    if raw.is_empty() {
        return Ok(Team::ALL.to_vec());
    }
    raw.iter().map(|team| team.parse()).collect()
}

fn parse_range(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    Ok((parse_instant(start)?, parse_instant(end)?))
}

async fn execute(cli: Cli) -> Result<(), String> {
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Sync { teams } => {
            let teams = parse_teams(&teams)?;
            let pipeline = SyncPipeline::from_env(&data_dir).map_err(|e| e.to_string())?;
            let report = pipeline.run(&teams, Utc::now()).await.map_err(|e| e.to_string())?;
            print_json(&report)
        }
        Commands::Reconcile { start, end } => {
            let (start, end) = parse_range(&start, &end)?;
            print_json(&reconcile_range(data_dir, start, end).await?)
        }
        Commands::Schedule => {
            let pipeline = SyncPipeline::from_env(&data_dir).map_err(|e| e.to_string())?;
            Scheduler::new(Arc::new(pipeline)).run().await.map_err(|e| e.to_string())
        }
        Commands::Orders { action } => match action {
            OrderAction::Import { file } => {
                let orders: Vec<WeeklyOrder> = read_json_file(&file)?;
                let mut results = Vec::with_capacity(orders.len());
                for order in orders {
                    let update = Some(order.clone());
                    let updated =
                        order_crud(data_dir.clone(), "update".into(), update, None, None).await;
                    let result = match updated {
                        Ok(value) => value,
                        Err(_) => {
                            order_crud(data_dir.clone(), "create".into(), Some(order), None, None)
                                .await?
                        }
                    };
                    results.push(result);
                }
                print_json(&results)
            }
            OrderAction::List => {
                print_json(&order_crud(data_dir, "list".into(), None, None, None).await?)
            }
            OrderAction::Projects { start, end } => {
                print_json(&get_order_projects(data_dir, start, end).await?)
            }
            OrderAction::Delete {
                project,
                start_week,
            } => print_json(
                &order_crud(data_dir, "delete".into(), None, Some(project), Some(start_week))
                    .await?,
            ),
        },
        Commands::Details { action } => match action {
            DetailAction::Import { file } => {
                let details: Vec<ProjectDetail> = read_json_file(&file)?;
                let mut results = Vec::with_capacity(details.len());
                for detail in details {
                    results.push(
                        detail_crud(data_dir.clone(), "upsert".into(), Some(detail)).await?,
                    );
                }
                print_json(&results)
            }
            DetailAction::List => print_json(&detail_crud(data_dir, "list".into(), None).await?),
        },
        Commands::Issues { action } => match action {
            IssueAction::List { start, end } => {
                print_json(&get_project_issues(data_dir, start, end).await?)
            }
            IssueAction::Note {
                project,
                start_week,
                task_type,
                text,
            } => print_json(
                &update_issue_note(data_dir, project, start_week, task_type, text).await?,
            ),
        },
        Commands::Points {
            start,
            end,
            by_team,
            identifiers,
        } => print_json(
            &get_performance_points(data_dir, identifiers, start, end, by_team).await?,
        ),
        Commands::Settings { set } => {
            let value = match set {
                Some(patch) => {
                    let patch = serde_json::from_str(&patch)
                        .map_err(|e| format!("Invalid settings JSON: {e}"))?;
                    save_settings(data_dir, patch).await?
                }
                None => get_settings(data_dir).await?,
            };
            print_json(&value)
        }
    }
}
