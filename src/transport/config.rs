use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::{Backoff, Constant};

const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(30);

/// Configuration for transport behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay strategy between a lost connection and the next attempt
    pub reconnect: ReconnectConfig,
    /// Give up on a connection attempt that has not opened within this long.
    /// The attempt is reported as an error and the reconnect timer takes over.
    /// `None` waits for the connector indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT_DURATION),
        }
    }
}

impl Config {
    /// Reconnect after a fixed `interval` following every connection loss.
    #[must_use]
    pub fn with_reconnect_interval(interval: Duration) -> Self {
        Self::with_reconnect(ReconnectConfig::Fixed { interval })
    }

    /// Use the given reconnection strategy.
    #[must_use]
    pub fn with_reconnect(reconnect: ReconnectConfig) -> Self {
        Self {
            reconnect,
            ..Self::default()
        }
    }

    /// Replace the connect timeout, `None` to disable it.
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Delay applied before each automatic reconnection attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectConfig {
    /// The same delay after every loss
    Fixed {
        /// Delay before the next attempt
        interval: Duration,
    },
    /// Growing delays, reset once a connection opens
    Exponential {
        /// Delay before the first attempt
        initial_backoff: Duration,
        /// Upper bound for any single delay
        max_backoff: Duration,
        /// Growth factor between consecutive delays
        backoff_multiplier: f64,
    },
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::Fixed {
            interval: DEFAULT_RECONNECT_INTERVAL_DURATION,
        }
    }
}

impl ReconnectConfig {
    /// Exponential strategy starting at `initial_backoff`, capped at one minute.
    #[must_use]
    pub fn exponential(initial_backoff: Duration) -> Self {
        Self::Exponential {
            initial_backoff,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub(crate) fn schedule(self) -> Box<dyn Backoff + Send> {
        match self {
            Self::Fixed { interval } => Box::new(Constant::new(interval)),
            Self::Exponential {
                initial_backoff,
                max_backoff,
                backoff_multiplier,
            } => Box::new(
                ExponentialBackoffBuilder::default()
                    .with_initial_interval(initial_backoff)
                    .with_max_interval(max_backoff)
                    .with_multiplier(backoff_multiplier)
                    .with_max_elapsed_time(None) // Retries until the transport is closed
                    .build(),
            ),
        }
    }
}
