//! LLM Provider implementations for reactloop.
//!
//! All providers implement the `reactloop_core::Provider` trait.
//! [`build_from_config`] selects the backend from configuration.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use reactloop_config::{ProviderConfig, ProviderKind};
use reactloop_core::error::ProviderError;
use reactloop_core::provider::Provider;
use std::sync::Arc;

/// Build the configured provider.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(format!(
            "no API key for the {} provider (set REACTLOOP_API_KEY or provider.api_key)",
            config.kind
        ))
    })?;

    let provider = match config.kind {
        ProviderKind::OpenAi => OpenAiCompatProvider::new("openai", &config.api_url, api_key)?,
        ProviderKind::Azure => {
            OpenAiCompatProvider::azure(&config.api_url, &config.api_version, api_key)?
        }
    };

    tracing::debug!(provider = %config.kind, model = %config.model, "Provider configured");
    Ok(Arc::new(provider))
}
