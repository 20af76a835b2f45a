//! The ordered tier chain.
//!
//! A chain pairs each backend with its own circuit breaker, in priority
//! order (index 0 is the most preferred tier). It is immutable once built.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use tiergate_core::{
    BreakerConfig, CircuitBreaker, Clock, ConfigurationError, RouterConfig, SystemClock,
};

use crate::backend::{Backend, BackendError, BackendRegistry};

/// Errors from building a chain out of configuration.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Tier '{tier}': {source}")]
    Backend {
        tier: String,
        #[source]
        source: BackendError,
    },
}

/// One slot in the chain: a backend and the breaker guarding it.
pub struct Tier {
    name: String,
    backend: Arc<dyn Backend>,
    breaker: CircuitBreaker,
    timeout: Option<Duration>,
}

impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.name)
            .field("backend", &self.backend.kind())
            .field("breaker", &self.breaker)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Tier {
    /// Create a tier whose breaker reads the system clock.
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>, config: BreakerConfig) -> Self {
        Self::with_clock(name, backend, config, Arc::new(SystemClock))
    }

    /// Create a tier whose breaker reads `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::with_clock(name.clone(), config, clock),
            name,
            backend,
            timeout: None,
        }
    }

    /// Bound every backend call on this tier.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Ordered, immutable list of tiers.
#[derive(Debug)]
pub struct TierChain {
    tiers: Vec<Tier>,
}

impl TierChain {
    /// Build a chain, validating every tier.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, ConfigurationError> {
        if tiers.is_empty() {
            return Err(ConfigurationError::EmptyChain);
        }

        let mut seen = HashSet::new();
        for tier in &tiers {
            if !seen.insert(tier.name.as_str()) {
                return Err(ConfigurationError::DuplicateTier(tier.name.clone()));
            }
            tier.breaker.config().validate(&tier.name)?;
            if tier.timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigurationError::InvalidTimeout {
                    tier: tier.name.clone(),
                });
            }
        }

        Ok(Self { tiers })
    }

    /// Build a chain from configuration, creating backends through `registry`.
    pub fn from_config(
        config: &RouterConfig,
        registry: &BackendRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AssemblyError> {
        config.validate()?;

        let tiers = config
            .tiers
            .iter()
            .map(|tier| {
                let backend = registry
                    .create(&tier.backend.kind, &tier.name, &tier.backend.settings_json())
                    .map_err(|source| AssemblyError::Backend {
                        tier: tier.name.clone(),
                        source,
                    })?;
                tracing::debug!(
                    tier = %tier.name,
                    backend = %tier.backend.kind,
                    "Tier assembled"
                );
                Ok(Tier::with_clock(
                    tier.name.clone(),
                    backend,
                    tier.breaker_config(&config.defaults),
                    clock.clone(),
                )
                .with_timeout(tier.attempt_timeout(&config.defaults)))
            })
            .collect::<Result<Vec<_>, AssemblyError>>()?;

        Ok(Self::new(tiers)?)
    }

    /// Number of tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false for a constructed chain.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Tiers in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    /// Priority index of a tier.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.name == name)
    }

    /// Tier names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name.as_str()).collect()
    }

    /// Visiting order for a request that prefers `preferred` tiers.
    ///
    /// Preferred tiers come first in the order given; the remaining tiers
    /// follow in their configured order. Unknown or repeated names are
    /// ignored.
    pub fn ordered(&self, preferred: &[String]) -> Vec<&Tier> {
        let mut order: Vec<&Tier> = Vec::with_capacity(self.tiers.len());
        for name in preferred {
            match self.get(name) {
                Some(tier) if !order.iter().any(|t| t.name == tier.name) => order.push(tier),
                Some(_) => {}
                None => tracing::debug!(tier = %name, "Ignoring unknown preferred tier"),
            }
        }
        for tier in &self.tiers {
            if !order.iter().any(|t| t.name == tier.name) {
                order.push(tier);
            }
        }
        order
    }
}
