//! Per-tier circuit breaker.
//!
//! When a tier fails repeatedly, its circuit opens and the router stops
//! sending it traffic. Once the recovery timeout has passed, the next request
//! that reaches the tier is allowed through as a trial: success closes the
//! circuit, failure re-opens it with a fresh timeout.
//!
//! ```text
//! Closed --[failures >= threshold]--> Open
//! Open --[recovery_timeout elapsed]--> HalfOpen
//! HalfOpen --[trial succeeds]--> Closed
//! HalfOpen --[trial fails]--> Open (opened_at = now)
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigurationError;

/// Failures before opening a circuit, unless configured otherwise.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Time an open circuit waits before allowing a trial, unless configured otherwise.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time before attempting recovery ("90s", "5m", or integer seconds)
    #[serde(default = "default_recovery_timeout", with = "duration_serde")]
    pub recovery_timeout: Duration,

    /// Admit only the caller that opened the recovery window as a trial.
    ///
    /// When false, every caller that observes `HalfOpen` may trial the tier.
    #[serde(default)]
    pub exclusive_probe: bool,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_timeout() -> Duration {
    DEFAULT_RECOVERY_TIMEOUT
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            exclusive_probe: false,
        }
    }
}

impl BreakerConfig {
    /// Create a config with the given threshold and recovery timeout.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            exclusive_probe: false,
        }
    }

    /// Require at most one concurrent recovery trial.
    pub fn with_exclusive_probe(mut self, exclusive: bool) -> Self {
        self.exclusive_probe = exclusive;
        self
    }

    /// Reject non-positive thresholds and timeouts.
    pub fn validate(&self, tier: &str) -> Result<(), ConfigurationError> {
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::InvalidThreshold {
                tier: tier.to_string(),
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigurationError::InvalidRecoveryTimeout {
                tier: tier.to_string(),
            });
        }
        Ok(())
    }
}

/// Humantime-or-seconds duration (de)serialization.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Secs(u64),
        Text(String),
    }

    impl RawDuration {
        fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
            match self {
                RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
                RawDuration::Text(text) => humantime::parse_duration(text.trim())
                    .map_err(|e| E::custom(format!("invalid duration '{}': {}", text, e))),
            }
        }
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawDuration::deserialize(deserializer)?.into_duration()
    }

    pub mod option {
        use super::RawDuration;
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<RawDuration>::deserialize(deserializer)?
                .map(RawDuration::into_duration)
                .transpose()
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Normal operation
    Closed,

    /// Tier is skipped until the recovery timeout elapses
    Open,

    /// Trial requests are allowed to test recovery
    HalfOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::Open => write!(f, "OPEN"),
            State::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    /// State as reported by [`CircuitBreaker::current_state`]
    pub state: State,

    /// Consecutive failures since the last success or reset
    pub failure_count: u32,

    /// How long the circuit has been open, if it is
    pub open_for: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct BreakerInner {
    state: State,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl BreakerInner {
    const CLOSED: Self = Self {
        state: State::Closed,
        failure_count: 0,
        opened_at: None,
        trial_started_at: None,
    };

    fn recovery_due(&self, now: Instant, timeout: Duration) -> bool {
        self.state == State::Open && elapsed(self.opened_at, now, timeout)
    }

    /// A trial that has gone unanswered for a whole recovery timeout
    /// (cancelled or hung) no longer holds the half-open slot.
    fn trial_abandoned(&self, now: Instant, timeout: Duration) -> bool {
        self.state == State::HalfOpen && elapsed(self.trial_started_at, now, timeout)
    }

    fn reopen(&mut self, now: Instant) {
        self.state = State::Open;
        self.opened_at = Some(now);
        self.trial_started_at = None;
    }
}

fn elapsed(since: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    since.is_some_and(|t| now.saturating_duration_since(t) >= timeout)
}

/// Circuit breaker for a single tier.
///
/// All fields live behind one mutex that is held only while reading or
/// transitioning state, never across a backend call.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker using the system clock.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a closed breaker using the given clock.
    pub fn with_clock(
        name: impl Into<String>,
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::CLOSED),
        }
    }

    /// Name of the tier this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration this breaker was built with.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state.
    ///
    /// An open circuit whose recovery timeout has elapsed is reported as
    /// `HalfOpen`; the transition itself only happens in
    /// [`maybe_enter_recovery_probe`](Self::maybe_enter_recovery_probe).
    pub fn current_state(&self) -> State {
        let now = self.clock.now();
        let inner = self.inner.lock();
        if inner.recovery_due(now, self.config.recovery_timeout) {
            State::HalfOpen
        } else {
            inner.state
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != State::Closed {
            tracing::info!(
                tier = %self.name,
                from = %inner.state,
                "Circuit closed after successful recovery"
            );
        }
        *inner = BreakerInner::CLOSED;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        match inner.state {
            State::HalfOpen => {
                inner.reopen(now);
                tracing::warn!(tier = %self.name, "Circuit reopened after failed recovery trial");
            }
            State::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.reopen(now);
                tracing::warn!(
                    tier = %self.name,
                    failures = inner.failure_count,
                    "Circuit opened after repeated failures"
                );
            }
            State::Closed => {
                tracing::debug!(
                    tier = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Failure recorded"
                );
            }
            // Past the window the failure is a trial outcome, even if no
            // caller made the half-open transition first.
            State::Open if inner.recovery_due(now, self.config.recovery_timeout) => {
                inner.reopen(now);
                tracing::warn!(tier = %self.name, "Circuit reopened after failed recovery trial");
            }
            // A call that started before the circuit opened; the recovery
            // window keeps its original start.
            State::Open => {}
        }
    }

    /// Move an open circuit to `HalfOpen` once its recovery timeout has passed.
    ///
    /// Returns true only for the caller that performed the transition; that
    /// caller should send a trial request. A trial left without an outcome
    /// for another full recovery timeout is handed to the next caller.
    pub fn maybe_enter_recovery_probe(&self) -> bool {
        let now = self.clock.now();
        let timeout = self.config.recovery_timeout;
        let mut inner = self.inner.lock();
        if inner.recovery_due(now, timeout) {
            tracing::info!(tier = %self.name, "Circuit half-open, admitting recovery trial");
        } else if inner.trial_abandoned(now, timeout) {
            tracing::warn!(tier = %self.name, "Recovery trial never resolved, admitting another");
        } else {
            return false;
        }
        inner.state = State::HalfOpen;
        inner.trial_started_at = Some(now);
        true
    }

    /// Force the circuit closed and forget all failures.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::CLOSED;
        tracing::info!(tier = %self.name, "Circuit manually reset");
    }

    /// Consecutive failures since the last success or reset.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// When the circuit last opened, if it is not closed.
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    /// Snapshot of state, failure count, and time open.
    pub fn stats(&self) -> BreakerStats {
        let now = self.clock.now();
        let inner = *self.inner.lock();
        let state = if inner.recovery_due(now, self.config.recovery_timeout) {
            State::HalfOpen
        } else {
            inner.state
        };
        BreakerStats {
            state,
            failure_count: inner.failure_count,
            open_for: inner
                .opened_at
                .map(|opened| now.saturating_duration_since(opened)),
        }
    }
}
