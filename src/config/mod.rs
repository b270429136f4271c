//! # Dispatch Configuration System
//!
//! Layered configuration for the executor pool, the partitioner, the workers and the
//! broker connection.
//!
//! ## Architecture
//!
//! - **Typed defaults**: every field has a default from [`crate::constants`]
//! - **Layered sources**: defaults, `config/dispatch-config.yaml`, an environment
//!   specific `config/dispatch-config.<env>.yaml`, then `DISPATCH__*` variables
//! - **Explicit Validation**: invalid values are rejected before anything starts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let capacity = manager.config().execution.max_concurrency;
//! let settle = manager.config().execution.settle_delay();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{self, broker};
use crate::messaging::ConnectionSettings;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring dispatch-config.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Executor pool, partitioning and worker timing
    pub execution: ExecutionConfig,

    /// Message broker endpoint for the connection worker
    pub broker: BrokerConfig,
}

/// Executor pool, partitioning and worker timing settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Fixed number of concurrent executor slots
    pub max_concurrency: usize,
    /// Number of balanced batches a materialized item list is split into
    pub partition_fanout: usize,
    /// Number of lazy slices each host range is split into
    pub range_fanout: usize,
    /// Delay between a worker's last result/error and its completion event
    pub settle_delay_ms: u64,
    /// Per-item timeout handed to I/O bound callables
    pub item_timeout_ms: u64,
    /// Aggregator backlog depth above which a warning is logged
    pub event_backlog_warn_depth: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: constants::DEFAULT_MAX_CONCURRENCY,
            partition_fanout: constants::DEFAULT_PARTITION_FANOUT,
            range_fanout: constants::DEFAULT_RANGE_FANOUT,
            settle_delay_ms: constants::DEFAULT_SETTLE_DELAY.as_millis() as u64,
            item_timeout_ms: constants::DEFAULT_ITEM_TIMEOUT.as_millis() as u64,
            event_backlog_warn_depth: constants::DEFAULT_EVENT_BACKLOG_WARN_DEPTH,
        }
    }
}

impl ExecutionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}

/// Broker endpoint and credentials
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Generated as `client_` plus eight random hex digits when absent
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: broker::DEFAULT_HOST.to_string(),
            port: broker::DEFAULT_PORT,
            client_id: None,
            username: None,
            password: None,
            keep_alive_seconds: broker::DEFAULT_KEEP_ALIVE_SECONDS,
        }
    }
}

impl BrokerConfig {
    /// Build validated connection settings for the connection worker
    pub fn connection_settings(&self) -> ConfigResult<ConnectionSettings> {
        let settings = ConnectionSettings::new(&self.host, self.port)?
            .with_credentials(self.username.clone(), self.password.clone())
            .with_keep_alive(Duration::from_secs(self.keep_alive_seconds));

        Ok(match &self.client_id {
            Some(client_id) if !client_id.is_empty() => settings.with_client_id(client_id),
            _ => settings,
        })
    }
}

impl DispatchConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let execution = &self.execution;

        if execution.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.max_concurrency",
                "0",
                "executor pool needs at least one slot",
            ));
        }

        if execution.partition_fanout == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.partition_fanout",
                "0",
                "fan-out must be greater than 0",
            ));
        }

        if execution.partition_fanout > execution.max_concurrency {
            return Err(ConfigurationError::invalid_value(
                "execution.partition_fanout",
                execution.partition_fanout.to_string(),
                format!(
                    "fan-out cannot exceed max_concurrency ({})",
                    execution.max_concurrency
                ),
            ));
        }

        if execution.range_fanout == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.range_fanout",
                "0",
                "fan-out must be greater than 0",
            ));
        }

        if self.broker.host.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "broker.host",
                "broker configuration",
            ));
        }

        if self.broker.port == 0 {
            return Err(ConfigurationError::invalid_value(
                "broker.port",
                "0",
                "port must be between 1 and 65535",
            ));
        }

        Ok(())
    }
}
