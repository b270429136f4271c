//! Broker session boundary
//!
//! The connection worker talks to a broker only through [`BrokerConnector`] and
//! [`BrokerSession`]. Any pub/sub client library can sit behind these traits;
//! [`LoopbackBroker`](super::LoopbackBroker) is the in-process implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ConfigResult, ConfigurationError};
use crate::constants::broker;

/// Delivery guarantee requested for a subscription or publish
///
/// Variants are ordered by level, 0 to 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("Invalid QoS level: {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Validated parameters for one broker session
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    host: String,
    port: u16,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    keep_alive: Duration,
}

impl ConnectionSettings {
    /// Settings for `host:port` with a generated client id and the default keep-alive
    pub fn new(host: &str, port: u16) -> ConfigResult<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "host",
                "broker connection settings",
            ));
        }
        if port == 0 {
            return Err(ConfigurationError::invalid_value(
                "port",
                "0",
                "port must be between 1 and 65535",
            ));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            client_id: generate_client_id(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(broker::DEFAULT_KEEP_ALIVE_SECONDS),
        })
    }

    /// Build settings from free-form text fields, rejecting a non-numeric port
    ///
    /// Empty client id, username or password fields are treated as absent.
    pub fn from_parts(
        host: &str,
        port: &str,
        client_id: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> ConfigResult<Self> {
        let port_number = port.trim().parse::<u16>().map_err(|e| {
            ConfigurationError::invalid_value("port", port, e.to_string())
        })?;

        let present = |field: Option<&str>| {
            field
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let settings = Self::new(host, port_number)?
            .with_credentials(present(username), present(password));

        Ok(match present(client_id) {
            Some(client_id) => settings.with_client_id(&client_id),
            None => settings,
        })
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

fn generate_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", broker::CLIENT_ID_PREFIX, &suffix[..8])
}

/// Something a broker session delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection acknowledgement; `0` accepts the session
    ConnAck { code: u8 },
    /// A message on a subscribed topic; the payload is raw bytes
    Message { topic: String, payload: Vec<u8> },
    /// The broker closed the session
    Disconnected { reason: Option<String> },
}

/// Failures raised by a broker client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Broker unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Session is closed")]
    Closed,

    #[error("Broker rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
}

/// Opens broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    type Session: BrokerSession;

    /// Open a session; the broker's acknowledgement arrives as the first
    /// [`SessionEvent::ConnAck`]
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Self::Session, BrokerError>;
}

/// One open broker session
#[async_trait]
pub trait BrokerSession: Send + 'static {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BrokerError>;

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), BrokerError>;

    /// Next event from the broker, `None` once the session is gone
    ///
    /// Must be cancel-safe: dropping the future before it completes loses no event.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
