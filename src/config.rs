//! Configuration for atchannel
//!
//! Centralized channel configuration with sensible defaults.

use std::time::Duration;

use crate::error::{AtError, Result};

/// Configuration for a single AT channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    // -------------------------------------------------------------------------
    // Command Configuration
    // -------------------------------------------------------------------------
    /// Timeout applied by the convenience send wrappers and raw reads
    /// (milliseconds)
    pub default_timeout_ms: u64,

    /// Log every transmitted and received line at debug level
    pub trace: bool,

    // -------------------------------------------------------------------------
    // Unsolicited Event Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the queue between the read loop and the dispatcher thread
    pub event_queue_capacity: usize,

    /// Capacity of each subscriber's channel
    pub subscriber_capacity: usize,

    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on a single blocking transport read (milliseconds)
    pub poll_interval_ms: u64,

    /// Discard stale input when the read loop starts
    pub clear_on_start: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            trace: false,
            event_queue_capacity: 256,
            subscriber_capacity: 64,
            poll_interval_ms: 20,
            clear_on_start: true,
        }
    }
}

impl ChannelConfig {
    /// Create a new config builder
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Default command timeout as a Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Transport poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the channel cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_queue_capacity == 0 {
            return Err(AtError::Config(
                "event_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(AtError::Config(
                "subscriber_capacity must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AtError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for ChannelConfig
#[derive(Default)]
pub struct ChannelConfigBuilder {
    config: ChannelConfig,
}

impl ChannelConfigBuilder {
    /// Set the default command timeout (in milliseconds)
    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.config.default_timeout_ms = ms;
        self
    }

    /// Enable or disable line tracing
    pub fn trace(mut self, enabled: bool) -> Self {
        self.config.trace = enabled;
        self
    }

    /// Set the unsolicited event queue capacity
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Set the per-subscriber channel capacity
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.config.subscriber_capacity = capacity;
        self
    }

    /// Set the transport poll interval (in milliseconds)
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Drain stale input on start
    pub fn clear_on_start(mut self, enabled: bool) -> Self {
        self.config.clear_on_start = enabled;
        self
    }

    pub fn build(self) -> ChannelConfig {
        self.config
    }
}
