use serde::{Deserialize, Serialize};

/// Reconnection and diagnostics options for a [`RealtimeHub`](crate::RealtimeHub).
///
/// Separate from [`HubTimeouts`](crate::HubTimeouts), which bound individual
/// network operations.
///
/// # Example
///
/// ```rust
/// use pulse_link::HubOptions;
///
/// let options = HubOptions::default()
///     .with_base_delay_ms(2000)
///     .with_max_delay_ms(60_000)
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubOptions {
    /// Reconnect automatically after an unexpected close.
    /// Default: true
    #[serde(default = "default_auto_reconnect", alias = "autoReconnect")]
    pub auto_reconnect: bool,

    /// Delay before the first retry. Doubles with each consecutive failure.
    /// Default: 1000ms
    #[serde(default = "default_base_delay_ms", alias = "baseDelay")]
    pub base_delay_ms: u64,

    /// Upper bound for the retry delay.
    /// Default: 30000ms
    #[serde(default = "default_max_delay_ms", alias = "maxDelay")]
    pub max_delay_ms: u64,

    /// Consecutive failures after which the hub gives up and enters `Failed`.
    /// Default: Some(5). `None` retries forever.
    #[serde(
        default = "default_max_reconnect_attempts",
        alias = "maxReconnectAttempts"
    )]
    pub max_reconnect_attempts: Option<u32>,

    /// Log every frame and routing decision.
    #[serde(default)]
    pub debug: bool,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> Option<u32> {
    Some(5)
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            debug: false,
        }
    }
}

impl HubOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the delay before the first retry (in milliseconds)
    pub fn with_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay between retries (in milliseconds)
    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Set the maximum number of consecutive failures.
    /// Pass None for infinite retries.
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
