//! Transports carry operations to the server and route results back.
//!
//! An operation registers itself with [`Transport::subscribe`], passing a
//! weak [`OperationSink`]. The transport calls the sink for every result
//! frame tagged with that operation's id, until the operation completes,
//! fails, or is unsubscribed. Sinks that were dropped are skipped.
//!
//! Two transports ship with the crate:
//!
//! - [`ProtocolClient`](crate::protocol::ProtocolClient): graphql-transport-ws
//!   over a WebSocket, for every operation type
//! - [`HttpTransport`]: one POST per execution, for queries and mutations

mod http;

pub use self::http::{HttpTransport, HttpTransportConfig};

use std::sync::{Arc, Weak};

use crate::error::TransportError;
use crate::ids::OperationId;
use crate::protocol::{GraphQLError, GraphQLRequest, GraphQLResponse};

/// Receiver of the frames of one or more operation executions.
pub trait OperationSink: Send + Sync {
    /// An execution result.
    fn on_next(&self, operation_id: OperationId, response: GraphQLResponse);

    /// The server rejected or aborted the operation. Terminal.
    fn on_error(&self, operation_id: OperationId, errors: Vec<GraphQLError>);

    /// The operation finished. Terminal.
    fn on_complete(&self, operation_id: OperationId);

    /// The transport gave up on the operation. Terminal.
    fn on_transport_failed(&self, operation_id: OperationId, error: &TransportError);
}

/// A channel to a GraphQL server.
pub trait Transport: Send + Sync {
    /// Start an operation execution. Results are delivered to `sink`.
    fn subscribe(
        &self,
        operation_id: OperationId,
        request: GraphQLRequest,
        sink: Weak<dyn OperationSink>,
    ) -> Result<(), TransportError>;

    /// Stop an execution. Frames still in flight for it are dropped.
    fn unsubscribe(&self, operation_id: OperationId);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn subscribe(
        &self,
        operation_id: OperationId,
        request: GraphQLRequest,
        sink: Weak<dyn OperationSink>,
    ) -> Result<(), TransportError> {
        (**self).subscribe(operation_id, request, sink)
    }

    fn unsubscribe(&self, operation_id: OperationId) {
        (**self).unsubscribe(operation_id)
    }
}

/// What a transport hands to a sink.
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    Next(GraphQLResponse),
    Error(Vec<GraphQLError>),
    Complete,
    Failed(TransportError),
}

/// A frame addressed to one sink.
///
/// Transports collect deliveries while holding their own locks and dispatch
/// them afterwards, so a sink may call back into the transport.
pub struct Delivery {
    operation_id: OperationId,
    event: DeliveryEvent,
    sink: Weak<dyn OperationSink>,
}

impl Delivery {
    pub fn new(operation_id: OperationId, event: DeliveryEvent, sink: Weak<dyn OperationSink>) -> Self {
        Self {
            operation_id,
            event,
            sink,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn event(&self) -> &DeliveryEvent {
        &self.event
    }

    /// Hand the frame to the sink, if it is still alive.
    pub fn dispatch(self) {
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        match self.event {
            DeliveryEvent::Next(response) => sink.on_next(self.operation_id, response),
            DeliveryEvent::Error(errors) => sink.on_error(self.operation_id, errors),
            DeliveryEvent::Complete => sink.on_complete(self.operation_id),
            DeliveryEvent::Failed(error) => sink.on_transport_failed(self.operation_id, &error),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("operation_id", &self.operation_id)
            .field("event", &self.event)
            .finish()
    }
}
