//! graphql-transport-ws frames.
//!
//! See <https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md>.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::GraphQLRequest;
use super::response::{GraphQLError, GraphQLResponse};

/// WebSocket sub-protocol name sent in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// One frame of the graphql-transport-ws protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// Client -> Server: initialize the connection.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Server -> Client: connection accepted.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Either direction.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Either direction, answers `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Client -> Server: start an operation.
    Subscribe { id: String, payload: SubscribePayload },
    /// Server -> Client: an execution result.
    Next { id: String, payload: GraphQLResponse },
    /// Server -> Client: the operation failed before or during execution.
    Error { id: String, payload: Vec<GraphQLError> },
    /// Either direction: the operation is finished.
    Complete { id: String },
}

impl ProtocolMessage {
    /// Correlation id of operation frames.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Subscribe { id, .. }
            | Self::Next { id, .. }
            | Self::Error { id, .. }
            | Self::Complete { id } => Some(id),
            _ => None,
        }
    }
}

/// Payload of a `subscribe` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl From<&GraphQLRequest> for SubscribePayload {
    fn from(request: &GraphQLRequest) -> Self {
        Self {
            query: request.query.clone(),
            variables: request.variables.clone(),
            operation_name: request.operation_name.clone(),
            extensions: request.extensions.clone(),
        }
    }
}
