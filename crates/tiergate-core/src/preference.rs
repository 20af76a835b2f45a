//! Prompt-driven tier preferences.
//!
//! A preference rule maps a regular expression to a tier ordering. The first
//! rule whose pattern matches a prompt decides which tiers the router tries
//! first; tiers not named by the rule keep their configured order after it.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigurationError;

/// A single pattern-to-ordering rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRule {
    /// Regular expression matched against the prompt
    pub pattern: String,

    /// Tier names to try first, in order
    pub order: Vec<String>,
}

impl PreferenceRule {
    /// Create a rule.
    pub fn new(pattern: impl Into<String>, order: Vec<String>) -> Self {
        Self {
            pattern: pattern.into(),
            order,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    order: Vec<String>,
}

/// Compiled preference rules, evaluated in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TierPreferences {
    rules: Vec<CompiledRule>,
}

impl TierPreferences {
    /// Compile rules, rejecting invalid patterns.
    pub fn compile(rules: &[PreferenceRule]) -> Result<Self, ConfigurationError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex =
                    Regex::new(&rule.pattern).map_err(|e| ConfigurationError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(CompiledRule {
                    regex,
                    order: rule.order.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(Self { rules })
    }

    /// Preferred ordering for a prompt, if any rule matches.
    pub fn preferred_order(&self, prompt: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(prompt))
            .map(|rule| rule.order.as_slice())
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
