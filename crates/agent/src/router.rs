//! Keyword routing from an utterance to an ordered list of capabilities.

use concierge_config::RoutingConfig;
use concierge_core::capability::{Capability, DISCORD_METADATA, RoutingDecision, SEARCH};

/// One row of the routing table: a capability and the keywords that select it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub capability: Capability,
    keywords: Vec<String>,
}

impl RoutingRule {
    pub fn new<I, S>(capability: Capability, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            capability,
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Substring match, case-insensitive.
    pub fn matches(&self, utterance: &str) -> bool {
        let utterance = utterance.to_lowercase();
        self.keywords.iter().any(|k| utterance.contains(k.as_str()))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Priority-ordered routing table. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRouter {
    rules: Vec<RoutingRule>,
}

impl CapabilityRouter {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// Platform metadata is checked before search.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(vec![
            RoutingRule::new(Capability::tool_server(DISCORD_METADATA), &config.discord_keywords),
            RoutingRule::new(Capability::tool_server(SEARCH), &config.search_keywords),
        ])
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Route an utterance. The decision always ends with hosted search.
    pub fn classify(&self, utterance: &str) -> RoutingDecision {
        match self.rules.iter().find(|r| r.matches(utterance)) {
            Some(rule) => RoutingDecision::new([rule.capability.clone()]),
            None => RoutingDecision::fallback_only(),
        }
    }
}
