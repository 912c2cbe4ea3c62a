//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered, later ones
//! overriding earlier ones:
//!
//! 1. Built-in defaults ([`ConveyorConfig::default`])
//! 2. `{config_dir}/conveyor.{toml,yaml,json}` (optional)
//! 3. `{config_dir}/conveyor.{environment}.{toml,yaml,json}` (optional)
//! 4. `CONVEYOR__SECTION__KEY` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::ConveyorConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded configuration plus the context it was resolved in
#[derive(Debug)]
pub struct ConfigManager {
    config: ConveyorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = crate::logging::get_environment();
        Self::load_from_directory_with_env(None, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let load_error = |error: config::ConfigError| ConfigurationError::LoadError {
            environment: environment.to_string(),
            error: error.to_string(),
        };

        let defaults = config::Config::try_from(&ConveyorConfig::default()).map_err(load_error)?;
        let config: ConveyorConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(config_directory.join("conveyor")).required(false))
            .add_source(
                config::File::from(config_directory.join(format!("conveyor.{environment}")))
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CONVEYOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<ConveyorConfig>())
            .map_err(load_error)?;

        config.validate()?;

        info!(
            environment = %environment,
            store_backend = ?config.store.backend,
            web_enabled = config.web.enabled,
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &PathBuf {
        &self.config_directory
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("CONVEYOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
