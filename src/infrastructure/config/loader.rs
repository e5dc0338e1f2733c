//! Loads and validates `AppConfig` via `figment`: programmatic defaults,
//! then `.swarmctl/config.yaml`, then `.swarmctl/local.yaml`, then
//! `SWARMCTL_`-prefixed environment variables with `__` nesting.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::AppConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("state store path must not be empty")]
    EmptyStorePath,

    #[error("invalid log level '{0}', expected one of trace/debug/info/warn/error")]
    InvalidLogLevel(String),

    #[error("invalid log format '{0}', expected one of json/pretty")]
    InvalidLogFormat(String),

    #[error("semaphore retry_interval_ms must be greater than zero")]
    InvalidRetryInterval,

    #[error("executor max_include_depth must be greater than zero")]
    InvalidMaxIncludeDepth,

    #[error("pricing entry for model '{model}' has a negative {field} rate")]
    NegativePriceRate { model: String, field: &'static str },
}

/// Loads `AppConfig` from the layered sources and validates it before any
/// work starts: configuration errors are fatal and surface immediately.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Project config file, relative to the current working directory.
    pub const PROJECT_CONFIG_PATH: &'static str = ".swarmctl/config.yaml";
    /// Project-local override file, never meant to be checked into version control.
    pub const LOCAL_CONFIG_PATH: &'static str = ".swarmctl/local.yaml";
    /// Prefix every environment-variable override must carry.
    pub const ENV_PREFIX: &'static str = "SWARMCTL_";

    /// Build and validate an `AppConfig` from defaults, the two project
    /// config files (if present), and the environment, in that precedence
    /// order (later sources win).
    pub fn load() -> Result<AppConfig, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(Self::PROJECT_CONFIG_PATH))
            .merge(Yaml::file(Self::LOCAL_CONFIG_PATH))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let config: AppConfig = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Fail fast on configuration that would otherwise surface as a
    /// confusing runtime error deep inside the store, semaphore, or
    /// prompt composer.
    pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
        if config.store.path.trim().is_empty() {
            return Err(ConfigError::EmptyStorePath);
        }

        match config.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(ConfigError::InvalidLogLevel(config.logging.level.clone())),
        }

        match config.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => return Err(ConfigError::InvalidLogFormat(config.logging.format.clone())),
        }

        if config.semaphore.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidRetryInterval);
        }

        if config.executor.max_include_depth == 0 {
            return Err(ConfigError::InvalidMaxIncludeDepth);
        }

        for (model, price) in &config.pricing.models {
            if price.input_per_million < 0.0 {
                return Err(ConfigError::NegativePriceRate { model: model.clone(), field: "input_per_million" });
            }
            if price.output_per_million < 0.0 {
                return Err(ConfigError::NegativePriceRate { model: model.clone(), field: "output_per_million" });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::ModelPrice;

    fn valid_config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn default_config_validates() {
        assert!(ConfigLoader::validate(&valid_config()).is_ok());
    }

    #[test]
    fn empty_store_path_is_rejected() {
        let mut config = valid_config();
        config.store.path = "   ".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyStorePath)));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = valid_config();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        let mut config = valid_config();
        config.logging.format = "xml".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogFormat(_))));
    }

    #[test]
    fn zero_retry_interval_is_rejected() {
        let mut config = valid_config();
        config.semaphore.retry_interval_ms = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidRetryInterval)));
    }

    #[test]
    fn zero_include_depth_is_rejected() {
        let mut config = valid_config();
        config.executor.max_include_depth = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxIncludeDepth)));
    }

    #[test]
    fn negative_price_rate_is_rejected() {
        let mut config = valid_config();
        config.pricing.models.insert("sonnet".to_string(), ModelPrice { input_per_million: -1.0, output_per_million: 15.0 });
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::NegativePriceRate { .. })));
    }

    #[test]
    fn env_override_takes_precedence_over_defaults() {
        temp_env::with_var("SWARMCTL_STORE__PATH", Some("/tmp/custom-state.json"), || {
            let figment = Figment::new()
                .merge(Serialized::defaults(AppConfig::default()))
                .merge(Env::prefixed(ConfigLoader::ENV_PREFIX).split("__"));
            let config: AppConfig = figment.extract().unwrap();
            assert_eq!(config.store.path, "/tmp/custom-state.json");
        });
    }

    #[test]
    fn pricing_map_is_empty_by_default_for_unknown_models() {
        let config = valid_config();
        assert!(!config.pricing.models.contains_key("ghost-model"));
    }
}
