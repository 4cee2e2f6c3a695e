//! Auto-reconnect policy and exponential backoff bookkeeping.
//!
//! The policy is what the caller configures; the state is what the worker
//! tracks between attempts. All deadlines use the monotonic clock.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Smallest delay ever used between attempts
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Per-peer reconnect configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether a lost link is retried
    pub enabled: bool,
    /// Delay before the first retry after a drop
    pub initial_delay: Duration,
    /// Upper bound for the doubling delay
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Build a normalized policy.
    ///
    /// `initial_delay` is raised to [`MIN_RECONNECT_DELAY`] and `max_delay` is
    /// raised to `initial_delay`.
    pub fn new(enabled: bool, initial_delay: Duration, max_delay: Duration) -> Self {
        let initial_delay = initial_delay.max(MIN_RECONNECT_DELAY);
        Self {
            enabled,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Build a policy from millisecond values, as the flat API passes them
    pub fn from_millis(enabled: bool, initial_delay_ms: u32, max_delay_ms: u32) -> Self {
        Self::new(
            enabled,
            Duration::from_millis(initial_delay_ms.into()),
            Duration::from_millis(max_delay_ms.into()),
        )
    }

    /// Policy with retries switched off
    pub fn disabled() -> Self {
        Self::from(ReconnectConfig::default())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Serializable form of [`ReconnectPolicy`] used in configuration files
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether new peers start with auto-reconnect enabled
    pub enabled: bool,
    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl From<ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: ReconnectConfig) -> Self {
        ReconnectPolicy::from_millis(cfg.enabled, cfg.initial_delay_ms, cfg.max_delay_ms)
    }
}

/// Retry bookkeeping for one peer
#[derive(Clone, Debug)]
pub struct ReconnectState {
    attempt_count: u32,
    current_delay: Duration,
    next_attempt_at: Option<Instant>,
}

impl ReconnectState {
    /// Fresh state for a policy
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            attempt_count: 0,
            current_delay: policy.initial_delay,
            next_attempt_at: None,
        }
    }

    /// Number of failed retries since the link was lost
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Delay used for the pending retry
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Deadline of the pending retry, if any
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    /// Link lost (or first handshake failed): schedule the first retry.
    pub fn on_link_lost(&mut self, policy: &ReconnectPolicy, now: Instant) -> Instant {
        self.attempt_count = 0;
        self.current_delay = policy.initial_delay;
        let at = now + self.current_delay;
        self.next_attempt_at = Some(at);
        at
    }

    /// A retry handshake failed: double the delay up to the cap.
    pub fn on_attempt_failed(&mut self, policy: &ReconnectPolicy, now: Instant) -> Instant {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.current_delay = self
            .current_delay
            .saturating_mul(2)
            .min(policy.max_delay)
            .max(policy.initial_delay);
        let at = now + self.current_delay;
        self.next_attempt_at = Some(at);
        at
    }

    /// Handshake succeeded.
    pub fn on_connected(&mut self, policy: &ReconnectPolicy) {
        *self = Self::new(policy);
    }

    /// Retry abandoned (explicit disconnect or policy disabled).
    pub fn cancel(&mut self) {
        self.next_attempt_at = None;
    }

    /// Whether the pending retry is due
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.is_some_and(|at| now >= at)
    }
}
