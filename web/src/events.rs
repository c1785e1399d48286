use crate::metrics::MetricsCollector;
use crate::protocol::ServerMessage;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::mpsc;

pub type SessionId = String;
pub type ConnectionId = usize;

const EVENT_CHANNEL_BUFFER: usize = 256;

/// The two roles a live connection can hold. Role decides which of a pair
/// of role-filtered messages (see [`ConnectionRegistry::broadcast_filtered`])
/// a connection is handed, and whether a message is authorized at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Teacher,
    Student,
}

pub type MessageSender = mpsc::Sender<ServerMessage>;
pub type MessageReceiver = mpsc::Receiver<ServerMessage>;

struct Connection {
    id: ConnectionId,
    role: ConnectionRole,
    student_id: Option<String>,
    sender: MessageSender,
}

/// A registration handle. Dropping it unregisters the connection from the
/// registry, mirroring the subscribe/unsubscribe discipline used for game
/// events upstream.
pub struct ConnectionHandle {
    registry: ConnectionRegistry,
    session_id: SessionId,
    connection_id: ConnectionId,
    pub receiver: MessageReceiver,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.registry.unregister(&self.session_id, self.connection_id);
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    connections: RwLock<HashMap<SessionId, Vec<Connection>>>,
    next_id: AtomicUsize,
    metrics: OnceLock<Arc<MetricsCollector>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires a metrics sink so broadcasts are counted. A no-op if already
    /// attached; the test-only registries built by `ConnectionRegistry::new()`
    /// simply never call this and every broadcast path stays metrics-free.
    pub fn attach_metrics(&self, metrics: Arc<MetricsCollector>) {
        let _ = self.inner.metrics.set(metrics);
    }

    fn record_broadcast(&self) {
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_event_broadcast();
        }
    }

    pub fn register(
        &self,
        session_id: SessionId,
        role: ConnectionRole,
        student_id: Option<String>,
    ) -> ConnectionHandle {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let mut guard = self.inner.connections.write().expect("registry lock poisoned");
        guard.entry(session_id.clone()).or_default().push(Connection {
            id,
            role,
            student_id,
            sender: tx,
        });
        tracing::info!(session_id = %session_id, connection_id = id, ?role, "connection registered");
        ConnectionHandle { registry: self.clone(), session_id, connection_id: id, receiver: rx }
    }

    fn unregister(&self, session_id: &SessionId, connection_id: ConnectionId) {
        let mut guard = self.inner.connections.write().expect("registry lock poisoned");
        if let Some(list) = guard.get_mut(session_id) {
            list.retain(|c| c.id != connection_id);
            if list.is_empty() {
                guard.remove(session_id);
            }
        }
    }

    pub fn drop_session(&self, session_id: &SessionId) {
        let mut guard = self.inner.connections.write().expect("registry lock poisoned");
        guard.remove(session_id);
    }

    pub fn connection_count(&self, session_id: &SessionId) -> usize {
        let guard = self.inner.connections.read().expect("registry lock poisoned");
        guard.get(session_id).map(|l| l.len()).unwrap_or(0)
    }

    /// Sends the same message to every live connection in the session.
    pub fn broadcast(&self, session_id: &SessionId, message: ServerMessage) {
        self.broadcast_filtered(session_id, message.clone(), message);
    }

    /// Sends `teacher_message` to teacher connections and `student_message`
    /// to student connections, implementing the Broadcaster's role-filtered
    /// fan-out without ever constructing a message a given role should not
    /// see in the first place.
    pub fn broadcast_filtered(
        &self,
        session_id: &SessionId,
        teacher_message: ServerMessage,
        student_message: ServerMessage,
    ) {
        let connections = {
            let guard = self.inner.connections.read().expect("registry lock poisoned");
            guard.get(session_id).map(|l| {
                l.iter()
                    .map(|c| (c.id, c.role, c.sender.clone()))
                    .collect::<Vec<_>>()
            })
        };
        let Some(connections) = connections else { return };
        let mut dead = Vec::new();
        for (id, role, sender) in connections {
            let message = match role {
                ConnectionRole::Teacher => teacher_message.clone(),
                ConnectionRole::Student => student_message.clone(),
            };
            if sender.try_send(message).is_err() {
                dead.push(id);
            } else {
                self.record_broadcast();
            }
        }
        if !dead.is_empty() {
            let mut guard = self.inner.connections.write().expect("registry lock poisoned");
            if let Some(list) = guard.get_mut(session_id) {
                list.retain(|c| !dead.contains(&c.id));
            }
        }
    }

    /// Targeted send to the connection for one student, used for
    /// `answer_result` and `player_kicked`.
    pub fn send_to_student(&self, session_id: &SessionId, student_id: &str, message: ServerMessage) {
        let sender = {
            let guard = self.inner.connections.read().expect("registry lock poisoned");
            guard.get(session_id).and_then(|l| {
                l.iter()
                    .find(|c| c.student_id.as_deref() == Some(student_id))
                    .map(|c| c.sender.clone())
            })
        };
        if let Some(sender) = sender {
            if sender.try_send(message).is_ok() {
                self.record_broadcast();
            }
        }
    }

    pub fn close_connection_for_student(&self, session_id: &SessionId, student_id: &str) {
        let mut guard = self.inner.connections.write().expect("registry lock poisoned");
        if let Some(list) = guard.get_mut(session_id) {
            list.retain(|c| c.student_id.as_deref() != Some(student_id));
        }
    }
}

/// Per-connection token-bucket rate limiter enforcing
/// `WS_RATE_LIMIT_PER_SECOND` inbound messages per rolling second.
pub struct ConnectionRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ConnectionRateLimiter {
    pub fn new(messages_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(messages_per_second.max(1)).unwrap());
        ConnectionRateLimiter { limiter: RateLimiter::direct(quota) }
    }

    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
