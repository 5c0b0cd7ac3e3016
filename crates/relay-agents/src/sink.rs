use relay_core::TaskId;

use crate::types::OutputStream;

/// Receives agent output one line at a time, as it is produced.
pub trait OutputSink: Send + Sync {
    fn on_line(&self, task_id: &TaskId, stream: OutputStream, line: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_line(&self, _task_id: &TaskId, _stream: OutputStream, _line: &str) {}
}
