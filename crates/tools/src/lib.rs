//! Tool server operations for Concierge.
//!
//! Each tool server is a [`ToolRegistry`] served over stdio by
//! `concierge tool-server <kind>`:
//! - `search`: `google_search`, `weather_search`, `wikipedia_search`;
//! - `discord`: `get_server_info`, `list_channels`, `list_roles`, `list_members`.

pub mod discord_metadata;
pub mod http;
pub mod search;
pub mod weather;

use std::sync::Arc;
use std::time::Duration;

use concierge_core::tool::ToolRegistry;

pub use discord_metadata::GuildApi;
pub use search::SearchEndpoints;

/// Registry for the search tool server.
pub fn search_registry(endpoints: &SearchEndpoints, operation_timeout: Duration) -> ToolRegistry {
    let client = http::client(http::LOOKUP_TIMEOUT);
    let mut registry = ToolRegistry::new().with_timeout(operation_timeout);
    registry.register(Box::new(search::GoogleSearchTool::new(
        client.clone(),
        endpoints.instant_answer.clone(),
    )));
    registry.register(Box::new(weather::WeatherSearchTool));
    registry.register(Box::new(search::WikipediaSearchTool::new(
        client,
        endpoints.wikipedia.clone(),
    )));
    registry
}

/// Registry for the Discord metadata tool server.
pub fn discord_registry(api: GuildApi, operation_timeout: Duration) -> ToolRegistry {
    let api = Arc::new(api);
    let mut registry = ToolRegistry::new().with_timeout(operation_timeout);
    registry.register(Box::new(discord_metadata::ServerInfoTool::new(Arc::clone(&api))));
    registry.register(Box::new(discord_metadata::ListChannelsTool::new(Arc::clone(&api))));
    registry.register(Box::new(discord_metadata::ListRolesTool::new(Arc::clone(&api))));
    registry.register(Box::new(discord_metadata::ListMembersTool::new(api)));
    registry
}
