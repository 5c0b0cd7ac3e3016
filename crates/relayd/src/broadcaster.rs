//! Task-scoped publish/subscribe for log entries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use relay_core::{LogEntry, TaskId, TaskStatus};
use tokio::sync::broadcast;

const MIN_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Entry(LogEntry),
    Done { status: TaskStatus },
}

/// What a new subscriber starts from.
#[derive(Debug)]
pub struct LogSubscription {
    /// Most recent entries published before subscribing, oldest first.
    pub backlog: Vec<LogEntry>,
    pub receiver: broadcast::Receiver<LogEvent>,
}

#[derive(Debug)]
struct TaskChannel {
    recent: VecDeque<LogEntry>,
    sender: broadcast::Sender<LogEvent>,
}

/// Fans log entries out to live subscribers and keeps the last
/// `buffer_lines` entries of every unfinished task for late joiners.
///
/// A task's channel lives from its first published entry until `finish`.
/// Receivers still attached at that point drain what was sent, `Done`
/// included, and then observe the channel as closed. Finished tasks are
/// replayed from the store.
///
/// Delivery is best effort: a subscriber that falls more than the channel
/// capacity behind misses entries.
#[derive(Debug)]
pub struct LogBroadcaster {
    channels: Mutex<HashMap<TaskId, TaskChannel>>,
    buffer_lines: usize,
}

impl LogBroadcaster {
    pub fn new(buffer_lines: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            buffer_lines,
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<TaskId, TaskChannel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publishing to a finished task opens a new channel (a retry started).
    pub fn publish(&self, entry: LogEntry) {
        let capacity = self.buffer_lines.max(MIN_CHANNEL_CAPACITY);
        let mut channels = self.channels();
        let channel = channels
            .entry(entry.task_id.clone())
            .or_insert_with(|| TaskChannel {
                recent: VecDeque::new(),
                sender: broadcast::channel(capacity).0,
            });

        if self.buffer_lines > 0 {
            channel.recent.push_back(entry.clone());
            while channel.recent.len() > self.buffer_lines {
                channel.recent.pop_front();
            }
        }
        // No receivers is not an error.
        let _ = channel.sender.send(LogEvent::Entry(entry));
    }

    /// Signal `Done` and release the task's channel.
    pub fn finish(&self, task_id: &TaskId, status: TaskStatus) {
        if let Some(channel) = self.channels().remove(task_id) {
            let _ = channel.sender.send(LogEvent::Done { status });
        }
    }

    /// `None` when the task has no open channel: it finished, or never
    /// published anything.
    pub fn subscribe(&self, task_id: &TaskId) -> Option<LogSubscription> {
        let channels = self.channels();
        let channel = channels.get(task_id)?;
        Some(LogSubscription {
            backlog: channel.recent.iter().cloned().collect(),
            receiver: channel.sender.subscribe(),
        })
    }

    pub fn recent(&self, task_id: &TaskId) -> Vec<LogEntry> {
        self.channels()
            .get(task_id)
            .map(|channel| channel.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, task_id: &TaskId) -> usize {
        self.channels()
            .get(task_id)
            .map(|channel| channel.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of tasks with an open channel.
    pub fn open_channels(&self) -> usize {
        self.channels().len()
    }
}
