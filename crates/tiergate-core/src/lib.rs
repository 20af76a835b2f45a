//! # tiergate-core
//!
//! Failover decision state for tiergate.
//!
//! This crate holds everything about tiered routing that does not perform
//! I/O:
//! - The per-tier circuit breaker state machine
//! - The clock it reads time from
//! - Router configuration parsing and validation
//! - Prompt-pattern tier preferences
//!
//! Backends, the tier chain, and the router itself live in
//! `tiergate-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use tiergate_core::{BreakerConfig, CircuitBreaker, State};
//!
//! let breaker = CircuitBreaker::new("primary", BreakerConfig::new(2, Duration::from_secs(300)));
//! breaker.record_failure();
//! breaker.record_failure();
//! assert_eq!(breaker.current_state(), State::Open);
//!
//! breaker.record_success();
//! assert_eq!(breaker.current_state(), State::Closed);
//! ```

pub mod breaker;
pub mod clock;
pub mod config;
pub mod preference;

// Re-export main types at crate root
pub use breaker::{
    BreakerConfig, BreakerStats, CircuitBreaker, State, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RECOVERY_TIMEOUT,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendSpec, ConfigurationError, RouterConfig, TierConfig, TierDefaults};
pub use preference::{PreferenceRule, TierPreferences};
