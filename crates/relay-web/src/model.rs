use relay_core::{Task, TaskStatus};
use relayd::{LogEvent, TaskQuery};
use serde::{Deserialize, Serialize};

use crate::error::WebError;

pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl TaskListParams {
    pub fn into_query(self) -> Result<TaskQuery, WebError> {
        let defaults = TaskQuery::default();
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<TaskStatus>().map_err(WebError::BadRequest)?),
        };
        let limit = self.limit.unwrap_or(defaults.limit);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(WebError::BadRequest(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(TaskQuery {
            status,
            limit,
            offset: self.offset.unwrap_or(defaults.offset),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskListResponse {
    pub count: usize,
    pub tasks: Vec<Task>,
}

impl From<Vec<Task>> for TaskListResponse {
    fn from(tasks: Vec<Task>) -> Self {
        Self {
            count: tasks.len(),
            tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueTasksResponse {
    pub issue_number: u64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookStatus {
    pub ok: bool,
    pub endpoint: &'static str,
    pub events: [&'static str; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DoneEvent {
    pub status: TaskStatus,
}

pub fn log_event_name(event: &LogEvent) -> &'static str {
    match event {
        LogEvent::Entry(_) => "log",
        LogEvent::Done { .. } => "done",
    }
}

pub fn log_event_data(event: &LogEvent) -> String {
    let encoded = match event {
        LogEvent::Entry(entry) => serde_json::to_string(entry),
        LogEvent::Done { status } => serde_json::to_string(&DoneEvent { status: *status }),
    };
    encoded.unwrap_or_else(|_| "{}".to_string())
}
