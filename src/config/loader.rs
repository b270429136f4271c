//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the `config`
//! crate, lowest priority first: typed defaults, the base YAML file, the
//! environment-specific YAML file, then `DISPATCH__SECTION__KEY` variables.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::error::{ConfigResult, ConfigurationError};
use super::DispatchConfig;
use crate::constants::CONFIG_ENV_PREFIX;

const CONFIG_FILE_STEM: &str = "dispatch-config";

static GLOBAL_CONFIG: OnceLock<Arc<ConfigManager>> = OnceLock::new();

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: DispatchConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = crate::logging::get_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Load configuration with an explicit variable map standing in for the process
    /// environment (`None` reads the real environment)
    ///
    /// This is useful for testing without modifying global environment variables.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_overrides: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let defaults = Config::try_from(&DispatchConfig::default())
            .map_err(|e| ConfigurationError::load_failed("defaults", e))?;

        let environment_source = Environment::with_prefix(CONFIG_ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env_overrides);

        let config: DispatchConfig = Config::builder()
            .add_source(defaults)
            .add_source(File::from(Self::base_file(&config_directory)).required(false))
            .add_source(
                File::from(Self::environment_file(&config_directory, environment)).required(false),
            )
            .add_source(environment_source)
            .build()
            .map_err(|e| ConfigurationError::load_failed(config_directory.display().to_string(), e))?
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_failed(config_directory.display().to_string(), e))?;

        config.validate()?;

        info!(
            environment = environment,
            max_concurrency = config.execution.max_concurrency,
            partition_fanout = config.execution.partition_fanout,
            broker_host = %config.broker.host,
            "⚙️ CONFIG: Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Configuration for logging with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or_default();
        if let Some(broker) = value.get_mut("broker").and_then(|b| b.as_object_mut()) {
            if broker.get("password").is_some_and(|p| !p.is_null()) {
                broker.insert("password".to_string(), serde_json::json!("***REDACTED***"));
            }
        }
        value
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn base_file(config_directory: &Path) -> PathBuf {
        config_directory.join(format!("{CONFIG_FILE_STEM}.yaml"))
    }

    fn environment_file(config_directory: &Path, environment: &str) -> PathBuf {
        config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"))
    }

    /// Process-wide configuration, loaded on first access
    ///
    /// Falls back to validated defaults when loading fails.
    pub fn global() -> Arc<ConfigManager> {
        GLOBAL_CONFIG
            .get_or_init(|| {
                Self::load().unwrap_or_else(|e| {
                    warn!("Configuration loading failed ({e}), using defaults");
                    Arc::new(ConfigManager {
                        config: DispatchConfig::default(),
                        environment: crate::logging::get_environment(),
                        config_directory: PathBuf::from("config"),
                    })
                })
            })
            .clone()
    }

    /// Initialize the process-wide configuration from a specific directory
    pub fn initialize_global(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let manager = Self::load_from_directory(config_dir)?;
        GLOBAL_CONFIG
            .set(manager.clone())
            .map_err(|_| ConfigurationError::AlreadyInitialized)?;
        Ok(manager)
    }
}
