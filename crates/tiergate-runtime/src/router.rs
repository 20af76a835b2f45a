//! Request routing through the tier chain.
//!
//! Each call to [`Router::route`] walks the chain in priority order:
//! - An open tier is skipped without touching its backend
//! - A closed or recovering tier is queried; the first success is returned
//! - A failure is recorded on the tier's breaker and the walk continues
//!
//! Recovery probing is request-driven: there is no background timer. The
//! first request to reach an open tier after its recovery timeout becomes
//! the trial. Breaker locks are never held while a backend is being called.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use tiergate_core::{
    BreakerConfig, Clock, ConfigurationError, PreferenceRule, RouterConfig, State, SystemClock,
    TierPreferences,
};

use crate::admin::AdminControl;
use crate::backend::{Backend, BackendError, BackendRegistry};
use crate::chain::{AssemblyError, Tier, TierChain};

/// Errors that cross the router boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Every tier either failed or was skipped as open.
    #[error("All tiers exhausted ({})", describe_last_error(.last_error))]
    AllTiersExhausted {
        /// Most recent backend error, or `None` if no tier was attempted
        last_error: Option<BackendError>,
    },
}

fn describe_last_error(last_error: &Option<BackendError>) -> String {
    match last_error {
        Some(e) => format!("last error: {}", e),
        None => "no tiers attempted".to_string(),
    }
}

/// A successful routing outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteResult {
    /// The backend's answer
    #[serde(rename = "response")]
    pub answer: String,

    /// Name of the tier that answered
    #[serde(rename = "backend")]
    pub tier_used: String,

    /// Breaker state of that tier after the call
    #[serde(rename = "state")]
    pub final_state: State,
}

/// Routes prompts through a shared tier chain.
///
/// Cloning is cheap; clones share the chain and therefore the breakers.
#[derive(Debug, Clone)]
pub struct Router {
    chain: Arc<TierChain>,
    preferences: TierPreferences,
}

impl Router {
    /// Create a router over `chain` using its static order.
    pub fn new(chain: Arc<TierChain>) -> Self {
        Self {
            chain,
            preferences: TierPreferences::default(),
        }
    }

    /// Reorder tiers per request according to `preferences`.
    pub fn with_preferences(mut self, preferences: TierPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Assemble a router from configuration using the system clock.
    pub fn from_config(
        config: &RouterConfig,
        registry: &BackendRegistry,
    ) -> Result<Self, AssemblyError> {
        Self::from_config_with_clock(config, registry, Arc::new(SystemClock))
    }

    /// Assemble a router from configuration with an explicit clock.
    pub fn from_config_with_clock(
        config: &RouterConfig,
        registry: &BackendRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AssemblyError> {
        let chain = TierChain::from_config(config, registry, clock)?;
        let preferences = config.compile_preferences()?;
        tracing::info!(
            tiers = ?chain.names(),
            preference_rules = preferences.len(),
            "Router assembled"
        );
        Ok(Self::new(Arc::new(chain)).with_preferences(preferences))
    }

    /// The chain this router walks.
    pub fn chain(&self) -> &Arc<TierChain> {
        &self.chain
    }

    /// Introspection and reset handle sharing this router's breakers.
    pub fn admin(&self) -> AdminControl {
        AdminControl::new(self.chain.clone())
    }

    /// Route a prompt, applying configured preferences if one matches.
    pub async fn route(&self, prompt: &str) -> Result<RouteResult, RouterError> {
        match self.preferences.preferred_order(prompt) {
            Some(order) => {
                tracing::debug!(order = ?order, "Preference rule matched");
                self.route_through(prompt, self.chain.ordered(order)).await
            }
            None => self.route_through(prompt, self.chain.iter().collect()).await,
        }
    }

    /// Route a prompt, visiting `preferred` tiers first.
    ///
    /// Tiers not named keep their configured order after the preferred ones.
    pub async fn route_with_order(
        &self,
        prompt: &str,
        preferred: &[String],
    ) -> Result<RouteResult, RouterError> {
        self.route_through(prompt, self.chain.ordered(preferred)).await
    }

    async fn route_through(
        &self,
        prompt: &str,
        tiers: Vec<&Tier>,
    ) -> Result<RouteResult, RouterError> {
        let mut last_error = None;

        for tier in tiers {
            let breaker = tier.breaker();
            let is_trial = breaker.maybe_enter_recovery_probe();

            match breaker.current_state() {
                State::Open => {
                    tracing::debug!(tier = %tier.name(), "Circuit open, skipping tier");
                    continue;
                }
                State::HalfOpen if breaker.config().exclusive_probe && !is_trial => {
                    tracing::debug!(tier = %tier.name(), "Recovery trial in flight, skipping tier");
                    continue;
                }
                _ => {}
            }

            match attempt(tier, prompt).await {
                Ok(answer) => {
                    breaker.record_success();
                    tracing::debug!(tier = %tier.name(), trial = is_trial, "Tier answered");
                    return Ok(RouteResult {
                        answer,
                        tier_used: tier.name().to_string(),
                        final_state: State::Closed,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        tier = %tier.name(),
                        backend = %tier.backend().kind(),
                        trial = is_trial,
                        error = %e,
                        "Tier failed, falling through"
                    );
                    breaker.record_failure();
                    last_error = Some(e);
                }
            }
        }

        tracing::warn!(
            last_error = %describe_last_error(&last_error),
            "All tiers exhausted"
        );
        Err(RouterError::AllTiersExhausted { last_error })
    }
}

/// Call a tier's backend, bounded by the tier timeout if it has one.
async fn attempt(tier: &Tier, prompt: &str) -> Result<String, BackendError> {
    match tier.timeout() {
        Some(limit) => tokio::time::timeout(limit, tier.backend().query(prompt))
            .await
            .map_err(|_| BackendError::Timeout(limit))?,
        None => tier.backend().query(prompt).await,
    }
}

struct PendingTier {
    name: String,
    backend: Arc<dyn Backend>,
    config: BreakerConfig,
    timeout: Option<Duration>,
}

/// Builder for [`Router`].
pub struct RouterBuilder {
    tiers: Vec<PendingTier>,
    clock: Arc<dyn Clock>,
    preferences: Vec<PreferenceRule>,
}

impl RouterBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            tiers: Vec::new(),
            clock: Arc::new(SystemClock),
            preferences: Vec::new(),
        }
    }

    /// Clock every breaker reads.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Append a tier (lower priority than those already added).
    pub fn tier(
        mut self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
        config: BreakerConfig,
    ) -> Self {
        self.tiers.push(PendingTier {
            name: name.into(),
            backend,
            config,
            timeout: None,
        });
        self
    }

    /// Append a tier whose backend calls are bounded by `timeout`.
    pub fn timed_tier(
        mut self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
        config: BreakerConfig,
        timeout: Duration,
    ) -> Self {
        self.tiers.push(PendingTier {
            name: name.into(),
            backend,
            config,
            timeout: Some(timeout),
        });
        self
    }

    /// Add a preference rule.
    pub fn preference(mut self, pattern: impl Into<String>, order: Vec<String>) -> Self {
        self.preferences.push(PreferenceRule::new(pattern, order));
        self
    }

    /// Build the router.
    pub fn build(self) -> Result<Router, ConfigurationError> {
        let tiers = self
            .tiers
            .into_iter()
            .map(|p| {
                Tier::with_clock(p.name, p.backend, p.config, self.clock.clone())
                    .with_timeout(p.timeout)
            })
            .collect();
        let chain = TierChain::new(tiers)?;

        for rule in &self.preferences {
            if let Some(unknown) = rule.order.iter().find(|name| chain.get(name).is_none()) {
                return Err(ConfigurationError::UnknownPreferenceTier {
                    pattern: rule.pattern.clone(),
                    tier: unknown.clone(),
                });
            }
        }
        let preferences = TierPreferences::compile(&self.preferences)?;

        Ok(Router::new(Arc::new(chain)).with_preferences(preferences))
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
