//! `reactloop tools` — Show the tool catalog after discovery.

use reactloop_core::discovery::ToolDiscovery;
use reactloop_tools::{MultiServerDiscovery, build_registry};
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let discovery: Option<Arc<dyn ToolDiscovery>> = if config.discovery.servers.is_empty() {
        None
    } else {
        Some(Arc::new(MultiServerDiscovery::from_config(&config.discovery)?))
    };
    let registry = build_registry(&config, discovery).await;

    println!("{} tool(s) + finish\n", registry.len());
    for spec in registry.specs() {
        let origin = spec.server_label.as_deref().unwrap_or("local");
        println!("  {} [{origin}]", spec.name);
        println!("      {}", spec.description);
        for (name, param) in &spec.parameters {
            let required = if param.required { " (required)" } else { "" };
            println!("      - {name}: {}{required}", param.description);
        }
    }

    Ok(())
}
