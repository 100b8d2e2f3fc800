//! The graphql-transport-ws protocol.
//!
//! - [`ProtocolMessage`]: the wire frames
//! - [`ProtocolConnection`]: the I/O-free state machine (handshake, routing,
//!   re-subscription after reconnect)
//! - [`ProtocolClient`]: the tokio-tungstenite driver implementing
//!   [`Transport`](crate::transport::Transport)
//!
//! Requests and responses use the standard GraphQL-over-HTTP JSON shapes,
//! [`GraphQLRequest`] and [`GraphQLResponse`].

mod client;
mod connection;
mod message;
mod request;
mod response;

pub use client::{ProtocolClient, ProtocolConfig, ProtocolEvents, ReconnectConfig};
pub use connection::{ConnectionState, OperationStatus, ProtocolConnection};
pub use message::{ProtocolMessage, SUBPROTOCOL, SubscribePayload};
pub use request::{GraphQLRequest, OperationType};
pub use response::{GraphQLError, GraphQLLocation, GraphQLResponse, PathSegment};
