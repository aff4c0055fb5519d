pub mod config_cmd;
pub mod run;
pub mod servers;

use helmsman_config::AppConfig;
use helmsman_core::EventBus;
use helmsman_registry::{ConnectionTimeouts, DiscoverySources, ToolProviderRegistry};
use std::sync::Arc;

pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Build the registry for the current directory and run discovery.
pub(crate) async fn build_registry(
    config: &AppConfig,
    events: Option<Arc<EventBus>>,
) -> Result<Arc<ToolProviderRegistry>, Box<dyn std::error::Error>> {
    let root = std::env::current_dir()?;
    let mut builder = ToolProviderRegistry::builder(DiscoverySources::from_config(
        &config.servers,
        &root,
    ))
    .timeouts(ConnectionTimeouts::from(&config.servers));
    if let Some(events) = events {
        builder = builder.events(events);
    }

    let registry = builder.build();
    let known = registry.discover().await;
    tracing::debug!(root = %root.display(), servers = known, "Tool registry ready");
    Ok(registry)
}
