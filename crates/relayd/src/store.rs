//! SQLite-backed storage for tasks and their log entries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use relay_core::{LogEntry, LogLevel, Task, TaskId, TaskStats, TaskStatus};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("corrupt row: {message}")]
    Corrupt { message: String },
    #[error("task not found: {task_id}")]
    NotFound { task_id: TaskId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug)]
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    issue_number INTEGER NOT NULL,
    status_tag TEXT NOT NULL,
    branch_name TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_ms INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status_tag);
CREATE INDEX IF NOT EXISTS idx_tasks_issue ON tasks(issue_number);
CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_ms);

CREATE TABLE IF NOT EXISTS task_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    at TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs(task_id, seq);
"#,
        )?;
        Ok(())
    }

    pub fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        upsert(&self.conn(), task)
    }

    pub fn load_task(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        load(&self.conn(), task_id)
    }

    /// Load, mutate and save a task atomically.
    ///
    /// Nothing is written when `apply` fails.
    pub fn modify_task<T, E, F>(&self, task_id: &TaskId, apply: F) -> Result<(Task, T), E>
    where
        F: FnOnce(&mut Task) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let mut task = load(&tx, task_id)?.ok_or_else(|| StoreError::NotFound {
            task_id: task_id.clone(),
        })?;
        let value = apply(&mut task)?;
        upsert(&tx, &task)?;
        tx.commit().map_err(StoreError::from)?;
        Ok((task, value))
    }

    /// Newest first.
    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
        match query.status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT payload_json FROM tasks WHERE status_tag = ?1 \
                     ORDER BY created_ms DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(params![status.as_str(), limit, offset], |row| {
                    row.get::<_, String>(0)
                })?;
                collect_tasks(rows)
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT payload_json FROM tasks \
                     ORDER BY created_ms DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows =
                    stmt.query_map(params![limit, offset], |row| row.get::<_, String>(0))?;
                collect_tasks(rows)
            }
        }
    }

    pub fn tasks_for_issue(&self, issue_number: u64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM tasks WHERE issue_number = ?1 \
             ORDER BY created_ms DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![issue_number as i64], |row| row.get::<_, String>(0))?;
        collect_tasks(rows)
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM tasks WHERE status_tag = ?1 ORDER BY created_ms ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, String>(0))?;
        collect_tasks(rows)
    }

    pub fn branch_name_in_use(&self, branch_name: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM tasks WHERE branch_name = ?1 LIMIT 1",
                params![branch_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn stats(&self) -> Result<TaskStats, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status_tag, COUNT(*) FROM tasks GROUP BY status_tag")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = TaskStats::default();
        for row in rows {
            let (tag, count) = row?;
            let status = tag
                .parse::<TaskStatus>()
                .map_err(|message| StoreError::Corrupt { message })?;
            stats.record(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }

    /// Append a log line; the returned entry carries its assigned sequence number.
    pub fn append_log(&self, entry: &LogEntry) -> Result<LogEntry, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO task_logs (task_id, at, level, message) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.task_id.0,
                entry.at.to_rfc3339(),
                entry.level.as_str(),
                entry.message,
            ],
        )?;
        let mut stored = entry.clone();
        stored.seq = u64::try_from(conn.last_insert_rowid()).unwrap_or_default();
        Ok(stored)
    }

    /// Log entries of a task in append order, optionally only those after `after_seq`.
    pub fn list_logs(
        &self,
        task_id: &TaskId,
        after_seq: Option<u64>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT seq, at, level, message FROM task_logs \
             WHERE task_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )?;
        let after = after_seq.map(|seq| seq as i64).unwrap_or(0);
        let rows = stmt.query_map(params![task_id.0, after], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (seq, at, level, message) = row?;
            entries.push(LogEntry {
                task_id: task_id.clone(),
                seq: u64::try_from(seq).unwrap_or_default(),
                at: parse_ts(&at)?,
                level: level
                    .parse::<LogLevel>()
                    .map_err(|message| StoreError::Corrupt { message })?,
                message,
            });
        }
        Ok(entries)
    }
}

fn upsert(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    let payload = serde_json::to_string(task)?;
    conn.execute(
        r#"
INSERT INTO tasks (task_id, issue_number, status_tag, branch_name, payload_json, created_ms, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(task_id) DO UPDATE SET
  status_tag = excluded.status_tag,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
        params![
            task.id.0,
            task.issue.number as i64,
            task.status.as_str(),
            task.branch_name,
            payload,
            task.created_at.timestamp_millis(),
            task.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn load(conn: &Connection, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM tasks WHERE task_id = ?1",
            params![task_id.0],
            |row| row.get(0),
        )
        .optional()?;
    payload
        .map(|value| serde_json::from_str::<Task>(&value))
        .transpose()
        .map_err(StoreError::from)
}

fn collect_tasks<I>(rows: I) -> Result<Vec<Task>, StoreError>
where
    I: Iterator<Item = rusqlite::Result<String>>,
{
    let mut tasks = Vec::new();
    for row in rows {
        let payload = row?;
        tasks.push(serde_json::from_str::<Task>(&payload)?);
    }
    Ok(tasks)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| StoreError::TimestampParse {
            value: value.to_string(),
            source,
        })
}
