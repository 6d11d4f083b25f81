use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for the [`BoundedTaskProcessor`](crate::BoundedTaskProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorOptions {
    /// Operations allowed in `pending` or `processing` at once. Submissions
    /// beyond this are rejected, never queued.
    /// Default: 3
    #[serde(default = "default_max_concurrent", alias = "maxConcurrent")]
    pub max_concurrent: usize,

    /// Per-operation timeout in milliseconds. `0` disables the timer.
    /// Default: 30000ms
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,

    /// Log every operation transition.
    #[serde(default)]
    pub debug: bool,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    30000
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_ms: default_timeout_ms(),
            debug: false,
        }
    }
}

impl ProcessorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the per-operation timeout (in milliseconds)
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The timeout as a duration, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}
