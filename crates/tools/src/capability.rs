//! Capabilities from configuration.
//!
//! A `[[capabilities]]` entry names a logical tool and lists candidate
//! tools by name. Each tier is resolved against whatever handles are
//! available at build time; tiers naming a tool that is not available are
//! skipped.

use crate::tiered::{SyntheticFn, Tier, TieredTool};
use reactloop_config::CapabilityConfig;
use reactloop_core::tool::Tool;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Build a tiered capability, resolving tier tool names through `resolve`.
///
/// Returns `None` when no tier resolves and there is no synthetic fallback.
pub fn build_capability(
    config: &CapabilityConfig,
    resolve: impl Fn(&str) -> Option<Arc<dyn Tool>>,
    default_timeout: Duration,
) -> Option<TieredTool> {
    let mut tool = TieredTool::new(
        config.name.clone(),
        config.description.clone(),
        config.parameters.clone(),
    );

    for tier in &config.tiers {
        let Some(handle) = resolve(&tier.tool) else {
            debug!(capability = %config.name, tier = %tier.tool, "Tier tool not available, skipping");
            continue;
        };
        let timeout = tier
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        let mut built = Tier::new(handle).with_timeout(timeout);
        if let Some(template) = &tier.arguments {
            built = built.with_template(template.clone());
        }
        tool = tool.add(built);
    }

    if config.synthetic {
        tool = tool.with_synthetic(synthetic_for(config));
    }

    if tool.is_empty() && !tool.has_synthetic() {
        warn!(capability = %config.name, "No tier available, capability not registered");
        return None;
    }
    Some(tool)
}

fn synthetic_for(config: &CapabilityConfig) -> SyntheticFn {
    let name = config.name.clone();
    let note = config
        .synthetic_note
        .clone()
        .unwrap_or_else(|| format!("No source could answer '{name}'; this is a placeholder."));
    Arc::new(move |arguments: &Value| {
        json!({
            "capability": name,
            "arguments": arguments,
            "note": note,
        })
    })
}
