#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

/// Endpoint used when none was ever supplied.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

const DEFAULT_SETTLE_DELAY_DURATION: Duration = Duration::from_millis(100);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(3);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;
const DEFAULT_JITTER: f64 = 0.0;

/// Configuration for the engine connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint used by the first connect request that does not name one
    pub endpoint: String,
    /// Time between the handshake and the engine-setup commands
    pub settle_delay: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            settle_delay: DEFAULT_SETTLE_DELAY_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The defaults retry forever with a fixed three second delay.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts without a successful open.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each attempt; `1.0` keeps it fixed
    pub backoff_multiplier: f64,
    /// Randomization factor in `[0, 1]`; `0.0` disables jitter
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None, // Infinite reconnection by default
            initial_backoff: DEFAULT_RECONNECT_DELAY_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl ReconnectConfig {
    /// Retry forever, always waiting `delay`.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_backoff: delay,
            max_backoff: delay,
            ..Self::default()
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.jitter)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
