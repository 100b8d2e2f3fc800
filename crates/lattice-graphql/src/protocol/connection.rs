//! graphql-transport-ws state machine.
//!
//! [`ProtocolConnection`] implements the protocol without doing any I/O:
//! the driver tells it when the socket opens or drops and feeds it inbound
//! text frames; it answers with outbound frames (drained from
//! [`ProtocolConnection::drain_outbox`]) and with [`Delivery`]s for the
//! operations the frames belong to.
//!
//! Operations are tracked by [`OperationId`]. Each time an operation is sent
//! it gets a fresh correlation id, so after a reconnect late frames bearing
//! the previous id no longer route anywhere and are dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Weak;

use lattice_graphql_core::logging::targets;
use serde_json::Value;
use uuid::Uuid;

use super::message::{ProtocolMessage, SubscribePayload};
use super::request::GraphQLRequest;
use crate::error::TransportError;
use crate::ids::OperationId;
use crate::transport::{Delivery, DeliveryEvent, OperationSink};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket being opened.
    Connecting,
    /// `connection_init` sent, waiting for `connection_ack`.
    HandshakeSent,
    /// Acknowledged; operations flow.
    Ready,
}

/// Whether an operation is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Waiting for the connection to become ready.
    Pending,
    /// Subscribe sent.
    Sent,
    /// At least one result received.
    Streaming,
}

struct ActiveOperation {
    request: GraphQLRequest,
    sink: Weak<dyn OperationSink>,
    correlation_id: Option<String>,
    status: OperationStatus,
}

/// Sans-IO graphql-transport-ws client state.
pub struct ProtocolConnection {
    state: ConnectionState,
    init_payload: Option<Value>,
    outbox: VecDeque<ProtocolMessage>,
    operations: HashMap<OperationId, ActiveOperation>,
    routes: HashMap<String, OperationId>,
}

impl ProtocolConnection {
    pub fn new(init_payload: Option<Value>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            init_payload,
            outbox: VecDeque::new(),
            operations: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// The driver started opening a socket.
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// The socket is open: queue `connection_init`.
    pub fn transport_opened(&mut self) {
        self.state = ConnectionState::HandshakeSent;
        self.outbox.push_back(ProtocolMessage::ConnectionInit {
            payload: self.init_payload.clone(),
        });
    }

    /// The socket is gone. Active operations wait for the next ack.
    pub fn transport_lost(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.outbox.clear();
        self.routes.clear();
        for op in self.operations.values_mut() {
            op.correlation_id = None;
            op.status = OperationStatus::Pending;
        }
    }

    /// Start tracking an operation, sending it now if the connection is ready.
    pub fn subscribe(&mut self, operation_id: OperationId, request: GraphQLRequest, sink: Weak<dyn OperationSink>) {
        if let Some(previous) = self.operations.remove(&operation_id)
            && let Some(id) = previous.correlation_id
        {
            self.routes.remove(&id);
        }
        let mut op = ActiveOperation {
            request,
            sink,
            correlation_id: None,
            status: OperationStatus::Pending,
        };
        if self.is_ready() {
            self.send_subscribe(operation_id, &mut op);
        }
        self.operations.insert(operation_id, op);
    }

    /// Stop tracking an operation, telling the server if it was sent.
    pub fn unsubscribe(&mut self, operation_id: OperationId) {
        let Some(op) = self.operations.remove(&operation_id) else {
            return;
        };
        if let Some(id) = op.correlation_id {
            self.routes.remove(&id);
            if self.is_ready() {
                self.outbox.push_back(ProtocolMessage::Complete { id });
            }
        }
    }

    /// Queue a keep-alive ping.
    pub fn ping(&mut self) {
        if self.is_ready() {
            self.outbox.push_back(ProtocolMessage::Ping { payload: None });
        }
    }

    /// Fail and forget every operation.
    pub fn fail_all(&mut self, error: &TransportError) -> Vec<Delivery> {
        self.routes.clear();
        self.operations
            .drain()
            .map(|(operation_id, op)| Delivery::new(operation_id, DeliveryEvent::Failed(error.clone()), op.sink))
            .collect()
    }

    /// Frames to write, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<ProtocolMessage> {
        self.outbox.drain(..).collect()
    }

    /// Number of tracked operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn operation_status(&self, operation_id: OperationId) -> Option<OperationStatus> {
        self.operations.get(&operation_id).map(|op| op.status)
    }

    /// Correlation id the operation was last sent under.
    pub fn correlation_id(&self, operation_id: OperationId) -> Option<&str> {
        self.operations
            .get(&operation_id)
            .and_then(|op| op.correlation_id.as_deref())
    }

    /// Process one inbound text frame.
    pub fn receive(&mut self, text: &str) -> Vec<Delivery> {
        let message = match serde_json::from_str::<ProtocolMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(target: targets::PROTOCOL, error = %e, "dropping malformed frame");
                return Vec::new();
            }
        };

        match message {
            ProtocolMessage::ConnectionAck { .. } => {
                if self.state != ConnectionState::HandshakeSent {
                    tracing::debug!(target: targets::PROTOCOL, state = ?self.state, "unexpected connection_ack");
                    return Vec::new();
                }
                self.state = ConnectionState::Ready;
                tracing::debug!(
                    target: targets::PROTOCOL,
                    pending = self.operations.len(),
                    "connection acknowledged"
                );
                self.send_pending();
                Vec::new()
            }
            ProtocolMessage::Ping { payload } => {
                self.outbox.push_back(ProtocolMessage::Pong { payload });
                Vec::new()
            }
            ProtocolMessage::Pong { .. } => {
                tracing::trace!(target: targets::PROTOCOL, "pong");
                Vec::new()
            }
            ProtocolMessage::Next { id, payload } => {
                let Some(operation_id) = self.routes.get(&id).copied() else {
                    tracing::debug!(target: targets::PROTOCOL, %id, "dropping next for unknown id");
                    return Vec::new();
                };
                let Some(op) = self.operations.get_mut(&operation_id) else {
                    return Vec::new();
                };
                op.status = OperationStatus::Streaming;
                vec![Delivery::new(operation_id, DeliveryEvent::Next(payload), op.sink.clone())]
            }
            ProtocolMessage::Error { id, payload } => match self.finish(&id) {
                Some((operation_id, sink)) => {
                    vec![Delivery::new(operation_id, DeliveryEvent::Error(payload), sink)]
                }
                None => {
                    tracing::debug!(target: targets::PROTOCOL, %id, "dropping error for unknown id");
                    Vec::new()
                }
            },
            ProtocolMessage::Complete { id } => match self.finish(&id) {
                Some((operation_id, sink)) => vec![Delivery::new(operation_id, DeliveryEvent::Complete, sink)],
                None => {
                    tracing::debug!(target: targets::PROTOCOL, %id, "dropping complete for unknown id");
                    Vec::new()
                }
            },
            ProtocolMessage::ConnectionInit { .. } | ProtocolMessage::Subscribe { .. } => {
                tracing::warn!(target: targets::PROTOCOL, "dropping client-only frame sent by server");
                Vec::new()
            }
        }
    }

    fn finish(&mut self, id: &str) -> Option<(OperationId, Weak<dyn OperationSink>)> {
        let operation_id = self.routes.remove(id)?;
        let op = self.operations.remove(&operation_id)?;
        Some((operation_id, op.sink))
    }

    fn send_pending(&mut self) {
        let mut pending: Vec<OperationId> = self
            .operations
            .iter()
            .filter(|(_, op)| op.correlation_id.is_none())
            .map(|(id, _)| *id)
            .collect();
        pending.sort_unstable();
        for operation_id in pending {
            if let Some(mut op) = self.operations.remove(&operation_id) {
                self.send_subscribe(operation_id, &mut op);
                self.operations.insert(operation_id, op);
            }
        }
    }

    fn send_subscribe(&mut self, operation_id: OperationId, op: &mut ActiveOperation) {
        let id = Uuid::new_v4().to_string();
        tracing::trace!(target: targets::PROTOCOL, %operation_id, correlation_id = %id, "subscribe");
        self.routes.insert(id.clone(), operation_id);
        self.outbox.push_back(ProtocolMessage::Subscribe {
            id: id.clone(),
            payload: SubscribePayload::from(&op.request),
        });
        op.correlation_id = Some(id);
        op.status = OperationStatus::Sent;
    }
}

impl fmt::Debug for ProtocolConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolConnection")
            .field("state", &self.state)
            .field("operations", &self.operations.len())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}
