//! File-based configuration.
//!
//! # Configuration Format
//!
//! ```toml
//! [hub]
//! endpoint = "https://api.example.com/hubs/reasoning"
//! token = "eyJhbGc..."            # optional; usually supplied by a TokenSource
//! auto_reconnect = true
//! base_delay_ms = 1000            # first retry delay, doubles per failure
//! max_delay_ms = 30000            # retry delay ceiling
//! max_reconnect_attempts = 5      # 0 = unlimited
//! connection_timeout_secs = 10    # 0 disables
//! invoke_timeout_secs = 30
//! keepalive_interval_secs = 15
//! pong_timeout_secs = 5
//!
//! [processor]
//! max_concurrent = 3
//! timeout_ms = 30000              # 0 disables
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::hub::RealtimeHubBuilder;
use crate::models::{HubOptions, ProcessorOptions};
use crate::processor::BoundedTaskProcessor;
use crate::timeouts::HubTimeouts;
use crate::RealtimeHub;

/// Configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub hub: HubConfigSection,

    #[serde(default)]
    pub processor: ProcessorOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfigSection {
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum consecutive reconnect failures (0 = unlimited, default: 5)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
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

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_connection_timeout_secs() -> u64 {
    10
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

fn default_keepalive_interval_secs() -> u64 {
    15
}

fn default_pong_timeout_secs() -> u64 {
    5
}

impl LinkConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LinkError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hub.endpoint.trim().is_empty() {
            return Err(LinkError::ConfigurationError(
                "hub.endpoint must not be empty".to_string(),
            ));
        }
        if self.hub.base_delay_ms > self.hub.max_delay_ms {
            return Err(LinkError::ConfigurationError(format!(
                "hub.base_delay_ms ({}) must not exceed hub.max_delay_ms ({})",
                self.hub.base_delay_ms, self.hub.max_delay_ms
            )));
        }
        if self.processor.max_concurrent == 0 {
            return Err(LinkError::ConfigurationError(
                "processor.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hub_options(&self) -> HubOptions {
        // 0 means unlimited
        let max_attempts = match self.hub.max_reconnect_attempts {
            0 => None,
            n => Some(n),
        };
        HubOptions::default()
            .with_auto_reconnect(self.hub.auto_reconnect)
            .with_base_delay_ms(self.hub.base_delay_ms)
            .with_max_delay_ms(self.hub.max_delay_ms)
            .with_max_reconnect_attempts(max_attempts)
            .with_debug(self.hub.debug)
    }

    pub fn hub_timeouts(&self) -> HubTimeouts {
        HubTimeouts::builder()
            .connection_timeout(Duration::from_secs(self.hub.connection_timeout_secs))
            .invoke_timeout(Duration::from_secs(self.hub.invoke_timeout_secs))
            .keepalive_interval(Duration::from_secs(self.hub.keepalive_interval_secs))
            .pong_timeout(Duration::from_secs(self.hub.pong_timeout_secs))
            .build()
    }

    /// A hub builder preloaded with the endpoint, options, timeouts and, when
    /// configured, a static token.
    pub fn hub_builder(&self) -> RealtimeHubBuilder {
        let builder = RealtimeHub::builder()
            .endpoint(self.hub.endpoint.clone())
            .options(self.hub_options())
            .timeouts(self.hub_timeouts());
        match &self.hub.token {
            Some(token) => builder.token(token.clone()),
            None => builder,
        }
    }

    /// A processor using the built-in thread worker.
    pub fn processor(&self) -> BoundedTaskProcessor {
        BoundedTaskProcessor::new(self.processor.clone())
    }
}
