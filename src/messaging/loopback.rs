//! In-process broker
//!
//! Routes publishes between sessions of the same process using MQTT-style topic
//! filters (`+` matches one level, a trailing `#` matches the rest). Test hooks can
//! require credentials, refuse sessions with an acknowledgement code, hold back
//! acknowledgements, make the broker unreachable, drop a client and inject raw
//! payloads. A session leaves the broker when it disconnects or is dropped.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::session::{BrokerConnector, BrokerError, BrokerSession, ConnectionSettings, QoS, SessionEvent};

/// Acknowledgement code for bad credentials
pub const CONNACK_NOT_AUTHORIZED: u8 = 5;

struct ClientEntry {
    session: Uuid,
    sender: mpsc::UnboundedSender<SessionEvent>,
    filters: Vec<(String, QoS)>,
}

#[derive(Default)]
struct BrokerState {
    clients: DashMap<String, ClientEntry>,
    credentials: RwLock<Option<(String, String)>>,
    unreachable: AtomicBool,
    withhold_acknowledgements: AtomicBool,
    refusal_code: AtomicU8,
}

impl BrokerState {
    /// Remove a client only if the entry still belongs to `session`
    fn release(&self, client_id: &str, session: Uuid) {
        if self
            .clients
            .remove_if(client_id, |_, entry| entry.session == session)
            .is_some()
        {
            debug!(client_id = %client_id, "Loopback session released");
        }
    }

    /// Deliver to every client with a matching filter; returns the recipient count
    fn route(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let subscribed = entry
                .filters
                .iter()
                .any(|(filter, _)| topic_matches(filter, topic));
            if subscribed {
                let message = SessionEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                };
                if entry.sender.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

/// In-process broker; clones share the same routing table
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<BrokerState>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a username/password pair for every session
    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        *self.state.credentials.write() = Some((username.to_string(), password.to_string()));
        self
    }

    /// Acknowledge new sessions with `code`; `0` accepts them again
    pub fn refuse_with(&self, code: u8) {
        self.state.refusal_code.store(code, Ordering::SeqCst);
    }

    /// Leave new sessions waiting for an acknowledgement that never arrives
    pub fn withhold_acknowledgements(&self, withhold: bool) {
        self.state
            .withhold_acknowledgements
            .store(withhold, Ordering::SeqCst);
    }

    /// Make `connect` fail before any session exists
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Close a client's session from the broker side
    pub fn drop_client(&self, client_id: &str) -> bool {
        match self.state.clients.remove(client_id) {
            Some((_, entry)) => {
                let _ = entry.sender.send(SessionEvent::Disconnected {
                    reason: Some("dropped by broker".to_string()),
                });
                true
            }
            None => false,
        }
    }

    /// Deliver raw bytes to one client regardless of its subscriptions
    pub fn inject(&self, client_id: &str, topic: &str, payload: Vec<u8>) -> bool {
        self.state
            .clients
            .get(client_id)
            .map(|entry| {
                entry
                    .sender
                    .send(SessionEvent::Message {
                        topic: topic.to_string(),
                        payload,
                    })
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Publish from outside any session; returns the number of recipients
    pub fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        self.state.route(topic, payload)
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.state.clients.contains_key(client_id)
    }

    /// Filters a client is subscribed to
    pub fn subscriptions(&self, client_id: &str) -> Vec<(String, QoS)> {
        self.state
            .clients
            .get(client_id)
            .map(|entry| entry.filters.clone())
            .unwrap_or_default()
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    fn authorized(&self, settings: &ConnectionSettings) -> bool {
        match self.state.credentials.read().as_ref() {
            None => true,
            Some((username, password)) => {
                settings.username() == Some(username.as_str())
                    && settings.password() == Some(password.as_str())
            }
        }
    }
}

#[async_trait]
impl BrokerConnector for LoopbackBroker {
    type Session = LoopbackSession;

    async fn connect(&self, settings: &ConnectionSettings) -> Result<Self::Session, BrokerError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable {
                endpoint: settings.endpoint(),
                reason: "connection refused".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        let client_id = settings.client_id().to_string();

        if self.state.withhold_acknowledgements.load(Ordering::SeqCst) {
            debug!(client_id = %client_id, "Loopback session left unacknowledged");
            return Ok(LoopbackSession {
                client_id,
                session,
                broker: self.state.clone(),
                receiver,
                unacknowledged: Some(sender),
            });
        }

        let code = if self.authorized(settings) {
            self.state.refusal_code.load(Ordering::SeqCst)
        } else {
            CONNACK_NOT_AUTHORIZED
        };
        // The receiver buffers the acknowledgement; the sender is only kept for
        // accepted sessions
        let _ = sender.send(SessionEvent::ConnAck { code });

        if code == 0 {
            debug!(client_id = %client_id, "Loopback session accepted");
            self.state.clients.insert(
                client_id.clone(),
                ClientEntry {
                    session,
                    sender,
                    filters: Vec::new(),
                },
            );
        }

        Ok(LoopbackSession {
            client_id,
            session,
            broker: self.state.clone(),
            receiver,
            unacknowledged: None,
        })
    }
}

/// One session on a [`LoopbackBroker`]
pub struct LoopbackSession {
    client_id: String,
    session: Uuid,
    broker: Arc<BrokerState>,
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
    // keeps the stream of an unacknowledged session open
    unacknowledged: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        self.broker.release(&self.client_id, self.session);
    }
}

#[async_trait]
impl BrokerSession for LoopbackSession {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        let mut entry = self
            .broker
            .clients
            .get_mut(&self.client_id)
            .ok_or(BrokerError::Closed)?;
        entry.filters.retain(|(filter, _)| filter != topic);
        entry.filters.push((topic.to_string(), qos));
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], _qos: QoS) -> Result<(), BrokerError> {
        if topic.contains('+') || topic.contains('#') {
            return Err(BrokerError::Rejected {
                operation: "publish".to_string(),
                reason: format!("wildcards are not allowed in topic names: {topic}"),
            });
        }
        if !self.broker.clients.contains_key(&self.client_id) {
            return Err(BrokerError::Closed);
        }
        self.broker.route(topic, payload);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.unacknowledged = None;
        self.broker.release(&self.client_id, self.session);
        Ok(())
    }
}

/// MQTT topic filter matching
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
