//! # Connection Worker
//!
//! Maintains one persistent publish/subscribe session.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──start──► Connecting ──ack 0──► Connected ──stop / drop──► Disconnected
//!      ▲                     │    │
//!      │                     │    └──refused / unreachable──► Failed ──start──► Connecting
//!      └───────stop──────────┘
//! ```
//!
//! `start` runs the session on the calling task until the session ends, so it is
//! usually submitted with [`ExecutorPool::submit_async`](crate::execution::ExecutorPool::submit_async)
//! where it occupies one slot for its lifetime. `subscribe`, `publish` and `stop`
//! are synchronous and may be called from any context; they hand commands to the
//! session loop. The worker is never registered with the
//! [`WorkerRegistry`](crate::registry::WorkerRegistry) and ignores its broadcasts.
//!
//! ## Failure reporting
//!
//! Failures before the session is acknowledged produce exactly one
//! [`ConnectionEvent::ConnectFailed`] and end in `Failed`. Failures afterwards
//! produce [`ConnectionEvent::ErrorOccurred`] or an unexpected
//! [`ConnectionEvent::Disconnected`], never `ConnectFailed`.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::session::{BrokerConnector, BrokerSession, ConnectionSettings, QoS, SessionEvent};
use super::state::ConnectionState;
use super::MessagingError;
use crate::logging::{log_connection_operation, log_error};

/// Notifications emitted by the connection worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { unexpected: bool },
    MessageReceived { topic: String, payload: String },
    MessagePublished { topic: String },
    Subscribed { topic: String, qos: QoS },
    ErrorOccurred { message: String },
    ConnectFailed { message: String },
}

#[derive(Debug)]
enum Command {
    Subscribe { topic: String, qos: QoS },
    Publish { topic: String, payload: Vec<u8>, qos: QoS },
    Stop,
}

/// What woke the session loop
enum Step {
    Command(Option<Command>),
    Session(Option<SessionEvent>),
}

/// How the connect phase ended
enum Handshake<S> {
    Accepted(S),
    Failed(MessagingError),
    Stopped(Option<S>),
}

impl<C> Inner<C> {
    /// Release the command channel and settle in a terminal state
    fn finish(&self, terminal: ConnectionState) {
        let mut commands = self.commands.lock();
        *commands = None;
        self.subscriptions.clear();
        self.state.send_replace(terminal);
    }
}

/// Ownership of the active session taken by `start`
///
/// Released explicitly with the terminal state the session reached. If the `start`
/// future is dropped first, the claim is released on drop and the worker returns
/// to `Disconnected`; the broker session itself is dropped with the future.
struct SessionClaim<'a, C> {
    inner: &'a Inner<C>,
    released: bool,
}

impl<'a, C> SessionClaim<'a, C> {
    fn new(inner: &'a Inner<C>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    fn release(mut self, terminal: ConnectionState) {
        self.released = true;
        self.inner.finish(terminal);
    }
}

impl<C> Drop for SessionClaim<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            warn!("📡 CONNECTION: Session abandoned before it finished, resetting to disconnected");
            self.inner.finish(ConnectionState::Disconnected);
        }
    }
}

struct Inner<C> {
    connector: C,
    state: watch::Sender<ConnectionState>,
    /// Command channel of the running session; guarded together with state moves
    /// into and out of an active state
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    subscriptions: DashMap<String, QoS>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Handle to one pub/sub session; clones control the same session
pub struct ConnectionWorker<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for ConnectionWorker<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: BrokerConnector> ConnectionWorker<C> {
    /// Create an idle worker and the receiver of its events
    pub fn new(connector: C) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let worker = Self {
            inner: Arc::new(Inner {
                connector,
                state,
                commands: Mutex::new(None),
                subscriptions: DashMap::new(),
                events,
            }),
        };
        (worker, receiver)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Topics successfully subscribed in the current session
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        let mut topics: Vec<_> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        topics.sort();
        topics
    }

    /// Connect and run the session until it is stopped or dropped
    ///
    /// Fails immediately with [`MessagingError::AlreadyActive`] unless the worker is
    /// `Disconnected` or `Failed`. Connect failures are reported both as a
    /// `ConnectFailed` event and as the returned error.
    ///
    /// Dropping the returned future before it resolves releases the session and
    /// leaves the worker `Disconnected`.
    pub async fn start(&self, settings: ConnectionSettings) -> Result<(), MessagingError> {
        let mut commands = self.begin()?;
        let claim = SessionClaim::new(&self.inner);
        let endpoint = settings.endpoint();
        let client_id = settings.client_id().to_string();
        log_connection_operation("start", &client_id, &endpoint, "connecting", None);

        let session = match self.handshake(&settings, &mut commands).await {
            Handshake::Accepted(session) => session,
            Handshake::Failed(error) => {
                let message = error.to_string();
                log_connection_operation("start", &client_id, &endpoint, "failed", Some(&message));
                claim.release(ConnectionState::Failed);
                self.emit(ConnectionEvent::ConnectFailed { message });
                return Err(error);
            }
            Handshake::Stopped(session) => {
                if let Some(mut session) = session {
                    if let Err(e) = session.disconnect().await {
                        debug!("Disconnect after aborted connect failed: {e}");
                    }
                }
                log_connection_operation("start", &client_id, &endpoint, "disconnected", Some("stopped while connecting"));
                claim.release(ConnectionState::Disconnected);
                return Ok(());
            }
        };

        self.inner.state.send_replace(ConnectionState::Connected);
        log_connection_operation("start", &client_id, &endpoint, "connected", None);
        self.emit(ConnectionEvent::Connected);

        let unexpected = self.run_session(session, &mut commands).await;

        claim.release(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Disconnected { unexpected });
        log_connection_operation(
            "session",
            &client_id,
            &endpoint,
            "disconnected",
            unexpected.then_some("connection lost"),
        );
        Ok(())
    }

    /// Subscribe to a topic filter; ignored unless connected
    pub fn subscribe(&self, topic: &str, qos: QoS) {
        self.send_when_connected(
            "subscribe",
            Command::Subscribe {
                topic: topic.to_string(),
                qos,
            },
        );
    }

    /// Publish a payload; ignored unless connected
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, qos: QoS) {
        self.send_when_connected(
            "publish",
            Command::Publish {
                topic: topic.to_string(),
                payload: payload.into(),
                qos,
            },
        );
    }

    /// Move toward `Disconnected` from any state
    pub fn stop(&self) {
        let commands = self.inner.commands.lock();
        match commands.as_ref() {
            Some(sender) => {
                if sender.send(Command::Stop).is_err() {
                    debug!("Session loop already finished");
                }
            }
            None => {
                self.inner.state.send_if_modified(|state| {
                    let reset = *state == ConnectionState::Failed;
                    if reset {
                        *state = ConnectionState::Disconnected;
                    }
                    reset
                });
            }
        }
    }

    /// Atomically claim the worker for a new session
    fn begin(&self) -> Result<mpsc::UnboundedReceiver<Command>, MessagingError> {
        let mut commands = self.inner.commands.lock();
        let mut current = ConnectionState::Disconnected;
        let claimed = self.inner.state.send_if_modified(|state| {
            current = *state;
            if state.can_start() {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !claimed {
            warn!(state = %current, "📡 CONNECTION: Start ignored, session already active");
            return Err(MessagingError::AlreadyActive { state: current });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *commands = Some(sender);
        self.inner.subscriptions.clear();
        Ok(receiver)
    }

    async fn handshake(
        &self,
        settings: &ConnectionSettings,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Handshake<C::Session> {
        let connected = tokio::select! {
            result = self.inner.connector.connect(settings) => result,
            () = wait_for_stop(commands) => return Handshake::Stopped(None),
        };

        let mut session = match connected {
            Ok(session) => session,
            Err(error) => return Handshake::Failed(error.into()),
        };

        let acknowledgement = tokio::select! {
            event = session.next_event() => Some(event),
            () = wait_for_stop(commands) => None,
        };

        match acknowledgement {
            None => Handshake::Stopped(Some(session)),
            Some(Some(SessionEvent::ConnAck { code: 0 })) => Handshake::Accepted(session),
            Some(Some(SessionEvent::ConnAck { code })) => {
                Handshake::Failed(MessagingError::ConnectionRefused { code })
            }
            Some(_) => Handshake::Failed(MessagingError::NoAcknowledgement),
        }
    }

    /// Returns whether the session ended without a stop request
    async fn run_session(
        &self,
        mut session: C::Session,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = session.next_event() => Step::Session(event),
            };

            match step {
                Step::Command(None) | Step::Command(Some(Command::Stop)) => {
                    if let Err(e) = session.disconnect().await {
                        debug!("Disconnect failed: {e}");
                    }
                    return false;
                }
                Step::Command(Some(Command::Subscribe { topic, qos })) => {
                    match session.subscribe(&topic, qos).await {
                        Ok(()) => {
                            info!(topic = %topic, "📡 CONNECTION: Subscribed");
                            self.inner.subscriptions.insert(topic.clone(), qos);
                            self.emit(ConnectionEvent::Subscribed { topic, qos });
                        }
                        Err(e) => self.report_error("subscribe", format!("subscribe to {topic} failed: {e}")),
                    }
                }
                Step::Command(Some(Command::Publish {
                    topic,
                    payload,
                    qos,
                })) => match session.publish(&topic, &payload, qos).await {
                    Ok(()) => self.emit(ConnectionEvent::MessagePublished { topic }),
                    Err(e) => self.report_error("publish", format!("publish to {topic} failed: {e}")),
                },
                Step::Session(Some(SessionEvent::Message { topic, payload })) => {
                    match String::from_utf8(payload) {
                        Ok(payload) => self.emit(ConnectionEvent::MessageReceived { topic, payload }),
                        Err(e) => self.report_error(
                            "receive",
                            format!("message on {topic} is not valid UTF-8: {e}"),
                        ),
                    }
                }
                Step::Session(Some(SessionEvent::ConnAck { code })) => {
                    debug!(code = code, "Ignoring repeated acknowledgement");
                }
                Step::Session(Some(SessionEvent::Disconnected { reason })) => {
                    warn!(reason = ?reason, "📡 CONNECTION: Broker closed the session");
                    return true;
                }
                Step::Session(None) => {
                    warn!("📡 CONNECTION: Session stream ended");
                    return true;
                }
            }
        }
    }

    fn send_when_connected(&self, operation: &str, command: Command) {
        let commands = self.inner.commands.lock();
        let state = *self.inner.state.borrow();
        match commands.as_ref() {
            Some(sender) if state.is_connected() => {
                if sender.send(command).is_err() {
                    debug!(operation = operation, "Session loop already finished");
                }
            }
            _ => debug!(operation = operation, state = %state, "📡 CONNECTION: Ignored while not connected"),
        }
    }

    fn report_error(&self, operation: &str, message: String) {
        log_error("connection_worker", operation, &message, None);
        self.emit(ConnectionEvent::ErrorOccurred { message });
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("Connection event receiver dropped");
        }
    }
}

/// Resolves on a stop command or when every command sender is gone
async fn wait_for_stop(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Stop => return,
            other => debug!(command = ?other, "Dropping command received before connect"),
        }
    }
}
