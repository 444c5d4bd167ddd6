use std::time::Duration;

use crate::error::{ChannelError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "PROCBRIDGE_DEFAULT_TIMEOUT_MS";

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Used by `send` when the caller passes no timeout of its own
    pub default_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `PROCBRIDGE_DEFAULT_TIMEOUT_MS`. Unparsable or
    /// zero values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = lookup(ENV_DEFAULT_TIMEOUT_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.default_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_timeout(self.default_timeout)
    }
}

pub(crate) fn validate_timeout(timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(ChannelError::invalid_operation(
            "Timeout must be a positive duration",
        ));
    }
    Ok(())
}

/// Per-request options for `Channel::send_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub timeout: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
