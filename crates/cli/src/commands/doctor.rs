//! `reactloop doctor` — Diagnose configuration and discovery servers.

use reactloop_core::discovery::ToolDiscovery;
use reactloop_config::AppConfig;
use reactloop_tools::McpHttpClient;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("reactloop doctor");
    println!("================\n");

    let mut issues = 0;

    let path = config_path.map_or_else(AppConfig::config_path, Path::to_path_buf);
    if path.exists() {
        println!("  ✅ Config file: {}", path.display());
    } else {
        println!("  ⚠️  No config file at {} (using defaults)", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Ok(());
        }
    };

    println!("  ✅ Provider: {} / {}", config.provider.kind, config.provider.model);
    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key — set REACTLOOP_API_KEY or provider.api_key");
        issues += 1;
    }

    if config.discovery.servers.is_empty() {
        println!("  ⚠️  No discovery servers — only local tools will be available");
    }
    for server in &config.discovery.servers {
        let client = match McpHttpClient::from_config(server, config.discovery.timeout_secs) {
            Ok(client) => client,
            Err(e) => {
                println!("  ❌ Server '{}': {e}", server.label);
                issues += 1;
                continue;
            }
        };
        match client.list_tools().await {
            Ok(tools) => println!("  ✅ Server '{}' reachable, {} tool(s)", server.label, tools.len()),
            Err(e) => {
                println!("  ❌ Server '{}' unreachable: {e}", server.label);
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    if !path.exists() {
        println!("\n  Starter config for {}:\n", path.display());
        println!("{}", AppConfig::default_toml());
    }

    Ok(())
}
