//! `helmsman servers` / `helmsman start`: Tool server inspection.

use helmsman_core::ToolOrigin;
use helmsman_registry::ServerState;

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let registry = super::build_registry(&config, None).await?;
    let servers = registry.list_servers().await;

    if servers.is_empty() {
        println!("No tool servers found.");
        println!(
            "  Descriptor file: {}",
            config.servers.descriptor_file.display()
        );
        println!(
            "  Discovery dir:   {}",
            config.servers.discovery_dir.display()
        );
        return Ok(());
    }

    println!("{:<24} {:<16} STATUS", "NAME", "ORIGIN");
    for server in servers {
        println!(
            "{:<24} {:<16} {}",
            server.name,
            server.origin.to_string(),
            match server.status {
                ServerState::Running => "running",
                ServerState::Stopped => "stopped",
            }
        );
    }
    Ok(())
}

pub async fn start(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let registry = super::build_registry(&config, None).await?;

    let started = registry.start_server(name).await;
    let message = match started {
        Ok(message) => message,
        Err(e) => {
            registry.shutdown().await;
            return Err(e.into());
        }
    };
    println!("{message}");

    let origin = ToolOrigin::Server(name.to_string());
    for tool in registry.get_tools().await.iter().filter(|t| t.origin() == origin) {
        println!("  - {}: {}", tool.name(), tool.description());
    }

    registry.shutdown().await;
    Ok(())
}
