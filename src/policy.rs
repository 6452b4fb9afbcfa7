//! Header-equality policy gate evaluated before any limiter runs.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Requires a request header to carry an exact value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub header: String,
    pub value: String,
}

/// A policy rule as it appears in config files and admin requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRuleSpec {
    pub route: String,
    pub header_key: String,
    pub header_value: String,
}

impl From<&PolicyRuleSpec> for HeaderRule {
    fn from(spec: &PolicyRuleSpec) -> Self {
        Self {
            header: spec.header_key.clone(),
            value: spec.header_value.clone(),
        }
    }
}

/// Outcome of evaluating a route's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

/// Route-scoped header rules.
#[derive(Debug, Default)]
pub struct PolicyEvaluator {
    rules: RwLock<HashMap<String, Vec<HeaderRule>>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule for `route`.
    pub fn add_rule(&self, route: &str, rule: HeaderRule) {
        debug!(route = route, header = %rule.header, "Added policy rule");
        self.rules.write().entry(route.to_string()).or_default().push(rule);
    }

    /// Replace all rules for `route` with `rule`.
    pub fn set_rule(&self, route: &str, rule: HeaderRule) {
        debug!(route = route, header = %rule.header, "Replaced policy rules");
        self.rules.write().insert(route.to_string(), vec![rule]);
    }

    /// Evaluate the rules for `route`, reading headers through `lookup`.
    ///
    /// Every rule must match; the first mismatch decides the reason.
    pub fn evaluate<F>(&self, route: &str, lookup: F) -> PolicyDecision
    where
        F: Fn(&str) -> Option<String>,
    {
        let rules = self.rules.read();
        let Some(route_rules) = rules.get(route) else {
            return PolicyDecision::allow();
        };

        for rule in route_rules {
            if lookup(&rule.header).as_deref() != Some(rule.value.as_str()) {
                return PolicyDecision {
                    allowed: false,
                    reason: Some(format!("Header {} must equal {}", rule.header, rule.value)),
                };
            }
        }
        PolicyDecision::allow()
    }
}
