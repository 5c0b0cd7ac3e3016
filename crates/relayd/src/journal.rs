use std::sync::Arc;

use relay_agents::{OutputSink, OutputStream};
use relay_core::{LogEntry, LogLevel, TaskId};

use crate::broadcaster::LogBroadcaster;
use crate::store::TaskStore;

/// Writes task log lines to the store, then publishes them.
///
/// A store failure is reported through `tracing` and the line is still
/// published so live subscribers keep seeing output.
#[derive(Debug, Clone)]
pub struct TaskJournal {
    store: Arc<TaskStore>,
    broadcaster: Arc<LogBroadcaster>,
}

impl TaskJournal {
    pub fn new(store: Arc<TaskStore>, broadcaster: Arc<LogBroadcaster>) -> Self {
        Self { store, broadcaster }
    }

    pub fn record(&self, task_id: &TaskId, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(task_id.clone(), level, message);
        let entry = match self.store.append_log(&entry) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::error!(task_id = %task_id, error = %err, "failed to persist task log entry");
                entry
            }
        };
        self.broadcaster.publish(entry);
    }

    pub fn info(&self, task_id: &TaskId, message: impl Into<String>) {
        self.record(task_id, LogLevel::Info, message);
    }

    pub fn warn(&self, task_id: &TaskId, message: impl Into<String>) {
        self.record(task_id, LogLevel::Warning, message);
    }

    pub fn error(&self, task_id: &TaskId, message: impl Into<String>) {
        self.record(task_id, LogLevel::Error, message);
    }
}

impl OutputSink for TaskJournal {
    fn on_line(&self, task_id: &TaskId, stream: OutputStream, line: &str) {
        let level = match stream {
            OutputStream::Stdout => LogLevel::Info,
            OutputStream::Stderr => LogLevel::Warning,
        };
        self.record(task_id, level, line);
    }
}
