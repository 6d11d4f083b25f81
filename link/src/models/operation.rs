use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::task_kind::TaskKind;

/// Lifecycle of a processor operation. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Counts against the processor's concurrency ceiling.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// One unit of work submitted to the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: OperationStatus,
    /// Milliseconds since Unix epoch
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time spent inside the worker, as reported by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl Operation {
    pub(crate) fn new(id: String, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            status: OperationStatus::Pending,
            start_time: epoch_millis(),
            end_time: None,
            error: None,
            processing_time_ms: None,
        }
    }

    /// Wall-clock duration once terminal.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time))
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Counters over the processor's operation history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}
