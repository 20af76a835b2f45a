//! Operator-facing introspection and control.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tiergate_core::State;

use crate::chain::TierChain;

/// One tier's row in a [`StatusReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStatus {
    pub name: String,
    pub priority: usize,
    pub backend: String,
    pub state: State,
    pub failure_count: u32,
    pub failure_threshold: u32,
    #[serde(with = "secs")]
    pub recovery_timeout: Duration,
    #[serde(with = "secs::option", skip_serializing_if = "Option::is_none")]
    pub open_for: Option<Duration>,
}

/// Status of every tier at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub captured_at: DateTime<Utc>,
    pub tiers: Vec<TierStatus>,
}

impl StatusReport {
    /// Names of tiers whose circuit is not closed.
    pub fn degraded(&self) -> Vec<&str> {
        self.tiers
            .iter()
            .filter(|t| t.state != State::Closed)
            .map(|t| t.name.as_str())
            .collect()
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&d.as_secs_f64()),
                None => s.serialize_none(),
            }
        }
    }
}

/// Handle for inspecting and resetting the breakers of a chain.
#[derive(Debug, Clone)]
pub struct AdminControl {
    chain: Arc<TierChain>,
}

impl AdminControl {
    pub fn new(chain: Arc<TierChain>) -> Self {
        Self { chain }
    }

    /// Current state of every tier, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, State> {
        self.chain
            .iter()
            .map(|tier| (tier.name().to_string(), tier.breaker().current_state()))
            .collect()
    }

    /// Force every breaker closed.
    pub fn reset_all(&self) {
        for tier in self.chain.iter() {
            tier.breaker().reset();
        }
        tracing::info!(tiers = self.chain.len(), "All circuits reset");
    }

    /// Force one breaker closed. Returns false if no tier has that name.
    pub fn reset(&self, tier: &str) -> bool {
        match self.chain.get(tier) {
            Some(t) => {
                t.breaker().reset();
                true
            }
            None => {
                tracing::warn!(tier = %tier, "Reset requested for unknown tier");
                false
            }
        }
    }

    /// Detailed per-tier status, in priority order.
    pub fn status(&self) -> StatusReport {
        let tiers = self
            .chain
            .iter()
            .enumerate()
            .map(|(priority, tier)| {
                let stats = tier.breaker().stats();
                let config = tier.breaker().config();
                TierStatus {
                    name: tier.name().to_string(),
                    priority,
                    backend: tier.backend().kind().to_string(),
                    state: stats.state,
                    failure_count: stats.failure_count,
                    failure_threshold: config.failure_threshold,
                    recovery_timeout: config.recovery_timeout,
                    open_for: stats.open_for,
                }
            })
            .collect();

        StatusReport {
            captured_at: Utc::now(),
            tiers,
        }
    }

    /// Run every backend's health check concurrently.
    ///
    /// Results are advisory: breaker state is not changed.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let checks = self.chain.iter().map(|tier| async move {
            let healthy = tier.backend().health_check().await;
            if !healthy {
                tracing::warn!(tier = %tier.name(), "Health check failed");
            }
            (tier.name().to_string(), healthy)
        });
        join_all(checks).await.into_iter().collect()
    }
}
