//! `concierge classify`: Print the routing decision for an utterance.

use std::path::Path;

use concierge_agent::CapabilityRouter;
use concierge_core::capability::RoutingDecision;

use super::{CmdResult, load_config};

pub fn run(config_path: Option<&Path>, text: &str) -> CmdResult {
    let config = load_config(config_path)?;
    let router = CapabilityRouter::from_config(&config.routing);
    println!("{}", render(&router.classify(text)));
    Ok(())
}

/// `search -> hosted-search`
fn render(decision: &RoutingDecision) -> String {
    decision
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::capability::Capability;

    #[test]
    fn renders_chain_in_order() {
        let decision = RoutingDecision::new([Capability::tool_server("discord-metadata")]);
        assert_eq!(render(&decision), "discord-metadata -> hosted-search");
        assert_eq!(render(&RoutingDecision::fallback_only()), "hosted-search");
    }
}
