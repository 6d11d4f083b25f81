//! Timeout configuration for the realtime hub.
//!
//! Centralizes the timing knobs of the push connection: the transport
//! handshake, remote invocations and keepalive probing.

use std::time::Duration;

/// Timeout configuration for hub operations.
///
/// # Examples
///
/// ```rust
/// use pulse_link::HubTimeouts;
/// use std::time::Duration;
///
/// // Defaults
/// let timeouts = HubTimeouts::default();
///
/// // Slow links and long-running server methods
/// let timeouts = HubTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .invoke_timeout(Duration::from_secs(60))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubTimeouts {
    /// Timeout for establishing the push connection (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for a remote invocation to receive its completion.
    /// Default: 30 seconds
    pub invoke_timeout: Duration,

    /// Keep-alive ping interval. Set to 0 to disable keep-alive pings.
    /// Default: 15 seconds
    pub keepalive_interval: Duration,

    /// Maximum wait for any frame after a keepalive Ping before the
    /// connection is considered dead. Set to 0 to disable.
    /// Default: 5 seconds
    pub pong_timeout: Duration,
}

impl Default for HubTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            invoke_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl HubTimeouts {
    pub fn builder() -> HubTimeoutsBuilder {
        HubTimeoutsBuilder::new()
    }

    /// Short timeouts suitable for localhost development servers.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            invoke_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(3),
        }
    }

    /// Long timeouts for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            invoke_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }

    /// Zero, or anything beyond a year, disables the timer.
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`HubTimeouts`]; unset fields keep their defaults.
#[derive(Debug, Clone)]
pub struct HubTimeoutsBuilder {
    timeouts: HubTimeouts,
}

impl HubTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: HubTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    pub fn invoke_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.invoke_timeout = timeout;
        self
    }

    pub fn invoke_timeout_secs(self, secs: u64) -> Self {
        self.invoke_timeout(Duration::from_secs(secs))
    }

    /// Set the keepalive ping interval. Zero disables pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    pub fn keepalive_interval_secs(self, secs: u64) -> Self {
        self.keepalive_interval(Duration::from_secs(secs))
    }

    /// Set the pong timeout. Zero disables pong checking.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    pub fn pong_timeout_secs(self, secs: u64) -> Self {
        self.pong_timeout(Duration::from_secs(secs))
    }

    pub fn build(self) -> HubTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = HubTimeouts::default();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.invoke_timeout, Duration::from_secs(30));
        assert_eq!(timeouts.keepalive_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_builder() {
        let timeouts = HubTimeouts::builder()
            .connection_timeout_secs(60)
            .invoke_timeout_secs(120)
            .keepalive_interval_secs(0)
            .build();

        assert_eq!(timeouts.connection_timeout, Duration::from_secs(60));
        assert_eq!(timeouts.invoke_timeout, Duration::from_secs(120));
        assert!(timeouts.keepalive_interval.is_zero());
    }

    #[test]
    fn test_presets_are_ordered() {
        let fast = HubTimeouts::fast();
        let relaxed = HubTimeouts::relaxed();
        assert!(fast.connection_timeout < relaxed.connection_timeout);
        assert!(fast.invoke_timeout < relaxed.invoke_timeout);
    }

    #[test]
    fn test_is_no_timeout() {
        assert!(HubTimeouts::is_no_timeout(Duration::ZERO));
        assert!(!HubTimeouts::is_no_timeout(Duration::from_secs(1)));
        assert!(HubTimeouts::is_no_timeout(Duration::from_secs(86400 * 400)));
    }
}
