//! # Messaging
//!
//! Persistent publish/subscribe session management, independent of the batch pool.
//!
//! - [`ConnectionWorker`]: state machine driving one broker session
//! - [`BrokerConnector`] / [`BrokerSession`]: the boundary to a broker client
//! - [`LoopbackBroker`]: in-process broker implementing that boundary

pub mod connection_worker;
pub mod loopback;
pub mod session;
pub mod state;

pub use connection_worker::{ConnectionEvent, ConnectionWorker};
pub use loopback::{LoopbackBroker, LoopbackSession};
pub use session::{BrokerConnector, BrokerError, BrokerSession, ConnectionSettings, QoS, SessionEvent};
pub use state::ConnectionState;

use thiserror::Error;

/// Messaging error types
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Connection worker is already {state}")]
    AlreadyActive { state: ConnectionState },

    #[error("Broker refused the connection with code {code}")]
    ConnectionRefused { code: u8 },

    #[error("Session ended before the broker acknowledged the connection")]
    NoAcknowledgement,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
