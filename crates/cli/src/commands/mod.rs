pub mod ask;
pub mod doctor;
pub mod serve;
pub mod tools;

use reactloop_config::{AppConfig, ConfigError};
use std::path::Path;

/// Load config from an explicit file, or the default location, with
/// environment overrides applied on top.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            Ok(config)
        }
        None => AppConfig::load(),
    }
}
