//! The `config` module loads and validates runtime settings.
//!
//! Settings come from an optional `config/default` file and `CONNHUB_*`
//! environment variables (double underscore separates nested keys, for
//! example `CONNHUB_HUB__MAX_CONNECTIONS=500`). Anything left unspecified
//! falls back to [`Settings::default`].

mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{HubSettings, LoggingSettings, ServerSettings, Settings};

const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "CONNHUB";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a validated `Settings` struct
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`] with an explicit file name (extension optional).
pub fn load_config_from(file: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge_over(Settings::default());
    settings.hub.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
