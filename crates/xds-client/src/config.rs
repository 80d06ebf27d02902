//! Client configuration.

use enforcer_transport::Endpoint;
use enforcer_xds_protocol::NodeIdentity;
use std::time::Duration;

/// Default delay before the first retry attempt
pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default base delay between retry attempts
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Default cap on backoff doublings
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default deadline of the configuration bootstrap fetch
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);

/// Timing of retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Base delay between attempts.
    pub retry_period: Duration,
    /// Number of times the delay may double.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Delay before the next attempt once `completed` attempts have run.
    ///
    /// Grows from `retry_period` by doubling, up to
    /// `retry_period * 2^max_retries`.
    #[must_use]
    pub fn delay_after(&self, completed: u32) -> Duration {
        if completed == 0 {
            return self.initial_delay;
        }

        // Keeps the shift well inside u32.
        let doublings = (completed - 1).min(self.max_retries).min(16);
        self.retry_period.saturating_mul(1 << doublings)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_RETRY_DELAY,
            retry_period: DEFAULT_RETRY_PERIOD,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Settings shared by every discovery session of the process.
#[derive(Debug, Clone)]
pub struct XdsClientConfig {
    /// Control plane address.
    pub endpoint: Endpoint,
    /// Identity sent on every request.
    pub node: NodeIdentity,
    /// Reconnect timing.
    pub retry: RetryPolicy,
    /// Deadline of each bootstrap fetch.
    pub bootstrap_timeout: Duration,
}

impl Default for XdsClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("adapter", 18000),
            node: NodeIdentity::new("enforcer", "Unassigned"),
            retry: RetryPolicy::default(),
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}
