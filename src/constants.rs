//! # System Constants
//!
//! Defaults that define the operational boundaries of the dispatcher. Every value
//! here can be overridden through [`DispatchConfig`](crate::config::DispatchConfig).

use std::time::Duration;

/// Default number of concurrent executor slots
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default number of batches a materialized item list is split into
pub const DEFAULT_PARTITION_FANOUT: usize = 10;

/// Default number of lazy slices a host range is split into
pub const DEFAULT_RANGE_FANOUT: usize = 5;

/// Minimum delay between a worker's last result/error and its completion event
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Per-item timeout handed to callables that perform network I/O
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_millis(1000);

/// Aggregator backlog depth above which a warning is logged
pub const DEFAULT_EVENT_BACKLOG_WARN_DEPTH: usize = 10_000;

/// Broker defaults
pub mod broker {
    pub const DEFAULT_HOST: &str = "broker.emqx.io";
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 60;
    pub const CLIENT_ID_PREFIX: &str = "client_";
}

/// Environment variables consulted for environment detection, in priority order
pub const ENVIRONMENT_VARIABLES: [&str; 2] = ["DISPATCH_ENV", "APP_ENV"];

/// Prefix for configuration overrides read from the process environment
pub const CONFIG_ENV_PREFIX: &str = "DISPATCH";
