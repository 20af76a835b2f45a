//! # tiergate-runtime
//!
//! Async failover routing for tiergate.
//!
//! A [`Router`] walks an ordered [`TierChain`] of backends, each guarded by
//! its own circuit breaker from `tiergate-core`:
//! - The first tier to answer wins
//! - Failing tiers are skipped once their circuit opens
//! - An open tier is trialled again by the first request after its
//!   recovery timeout
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiergate_core::RouterConfig;
//! use tiergate_runtime::{BackendRegistry, Router};
//!
//! let config = RouterConfig::from_path("tiers.yaml")?;
//! let router = Router::from_config(&config, &BackendRegistry::with_defaults())?;
//!
//! let result = router.route("Where is my order?").await?;
//! println!("{} answered: {}", result.tier_used, result.answer);
//!
//! for tier in router.admin().status().tiers {
//!     println!("{}: {}", tier.name, tier.state);
//! }
//! ```

pub mod admin;
pub mod backend;
pub mod chain;
pub mod router;

pub use admin::{AdminControl, StatusReport, TierStatus};
pub use backend::{Backend, BackendError, BackendFactory, BackendRegistry};
pub use chain::{AssemblyError, Tier, TierChain};
pub use router::{RouteResult, Router, RouterBuilder, RouterError};
