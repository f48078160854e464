//! Tools the dialogue model can call mid-turn.
//!
//! - [`types`]: the [`Tool`] trait, [`ToolError`] and [`ToolResult`]
//! - [`registry`]: immutable name → tool lookup
//! - [`weather`], [`travel`], [`web_search`]: the built-in tools

pub mod registry;
pub mod travel;
pub mod types;
pub mod weather;
pub mod web_search;

use std::sync::Arc;

use crate::config::ToolsConfig;

pub use registry::{ToolRegistry, ToolRegistryBuilder};
pub use travel::TravelTool;
pub use types::{Tool, ToolArgs, ToolError, ToolResult};
pub use weather::WeatherTool;
pub use web_search::WebSearchTool;

/// Build the registry of built-in tools from configuration.
///
/// Returns an empty registry when tools are disabled.
pub fn builtin_registry(config: &ToolsConfig) -> ToolRegistry {
    if !config.enabled {
        return ToolRegistry::empty();
    }
    ToolRegistry::builder()
        .register(Arc::new(WeatherTool::new(&config.weather_base_url)))
        .register(Arc::new(TravelTool::new(
            &config.directions_url,
            config.maps_api_key.clone(),
        )))
        .register(Arc::new(WebSearchTool::new(&config.search_url)))
        .build()
}
