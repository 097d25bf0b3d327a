use crate::error::{PipelineError, Result};
use crate::models::raw_task::{ListRef, ListsResponse, RawTask, TaskPage};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

const COMPLETED_STATUS: &str = "COMPLETED";
const BODY_PREVIEW_CHARS: usize = 200;

/// Filters for one list fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub completed_only: bool,
    pub tag: Option<String>,
    pub include_subtasks: bool,
    pub done_after_ms: Option<i64>,
    pub done_before_ms: Option<i64>,
}

impl TaskQuery {
    pub fn query_params(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("archived", "false".to_string()),
            ("include_closed", "true".to_string()),
            ("page", page.to_string()),
        ];
        if self.completed_only {
            params.push(("statuses[]", COMPLETED_STATUS.to_string()));
        }
        if let Some(tag) = self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            params.push(("tags[]", tag.to_string()));
        }
        if self.include_subtasks {
            params.push(("subtasks", "true".to_string()));
        }
        if let Some(after) = self.done_after_ms {
            params.push(("date_done_gt", after.to_string()));
        }
        if let Some(before) = self.done_before_ms {
            params.push(("date_done_lt", before.to_string()));
        }
        params
    }
}

/// Read side of the task tracker.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn list_lists(&self, space_id: &str) -> Result<Vec<ListRef>>;

    async fn list_tasks_page(&self, list_id: &str, query: &TaskQuery, page: u32)
        -> Result<TaskPage>;
}

/// Pages through a list until the tracker reports the last page or returns
/// an empty one.
pub async fn fetch_all(
    source: &dyn TaskSource,
    list_id: &str,
    query: &TaskQuery,
) -> Result<Vec<RawTask>> {
    let mut page = 0;
    let mut tasks = Vec::new();
    loop {
        let batch = source.list_tasks_page(list_id, query, page).await?;
        debug!(
            "list {list_id} page {page}: {} tasks (last_page={})",
            batch.tasks.len(),
            batch.last_page
        );
        let done = batch.last_page || batch.tasks.is_empty();
        tasks.extend(batch.tasks);
        if done {
            return Ok(tasks);
        }
        page += 1;
    }
}

/// Fetches every list of a space. Any list failure fails the space.
pub async fn fetch_space(
    source: &dyn TaskSource,
    space_id: &str,
    query: &TaskQuery,
) -> Result<Vec<RawTask>> {
    let lists = source.list_lists(space_id).await?;
    debug!("space {space_id}: {} lists", lists.len());

    let mut tasks = Vec::new();
    for list in &lists {
        tasks.extend(fetch_all(source, &list.id, query).await?);
    }
    Ok(tasks)
}

pub struct ClickUpClient {
    http: Client,
    base: String,
    token: String,
}

impl ClickUpClient {
    pub fn new(base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("quotasync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        context: &str,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .header(AUTHORIZATION, &self.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| PipelineError::transport(context, e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::transport(context, e))?;

        if !status.is_success() {
            let preview: String = body.trim().chars().take(BODY_PREVIEW_CHARS).collect();
            return Err(PipelineError::transport(context, format!("HTTP {status}: {preview}")));
        }

        serde_json::from_str(&body).map_err(|e| PipelineError::decode(context, e))
    }
}

#[async_trait]
impl TaskSource for ClickUpClient {
    async fn list_lists(&self, space_id: &str) -> Result<Vec<ListRef>> {
        let url = format!("{}/space/{space_id}/list", self.base);
        let resp: ListsResponse = self
            .get_json(&format!("space {space_id}"), &url, &[("archived", "false".to_string())])
            .await?;
        Ok(resp.lists)
    }

    async fn list_tasks_page(
        &self,
        list_id: &str,
        query: &TaskQuery,
        page: u32,
    ) -> Result<TaskPage> {
        let url = format!("{}/list/{list_id}/task", self.base);
        self.get_json(
            &format!("list {list_id} page {page}"),
            &url,
            &query.query_params(page),
        )
        .await
    }
}
