//! Error types for the GraphQL runtime.

use std::time::Duration;

use crate::protocol::GraphQLError;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport failure (socket, HTTP, handshake, reconnect exhaustion).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be merged into the cache.
    #[error(transparent)]
    Deserialize(#[from] DeserializeError),

    /// The caller violated an operation contract.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The runtime schema tables are inconsistent.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Environment registry error.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    /// The server answered an operation with an `error` frame.
    #[error("GraphQL error: {}", join_messages(.0))]
    GraphQL(Vec<GraphQLError>),
}

fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while carrying operations to and from the server.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// WebSocket level failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Opening the connection took too long.
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The server did not acknowledge `connection_init` in time.
    #[error("Server did not acknowledge the connection within {0:?}")]
    HandshakeTimeout(Duration),

    /// Every reconnection attempt failed.
    #[error("Max reconnection attempts ({attempts}) reached")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The connection was closed and reconnecting is disabled.
    #[error("Connection closed")]
    Closed,

    /// HTTP request failed before a response was received.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// HTTP error status (4xx or 5xx).
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Wire payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(String),

    /// The transport cannot carry this kind of operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Errors raised while merging a payload into the cache.
///
/// A deserialization error fails the operation being merged, never the
/// connection or the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeserializeError {
    /// A polymorphic payload carried a `__typename` the dispatch table does not know.
    #[error("Unknown type '{type_name}' for abstract type '{abstract_type}'")]
    UnknownTypename {
        /// The interface or union being resolved.
        abstract_type: String,
        /// The discriminator found in the payload.
        type_name: String,
    },

    /// A polymorphic payload had no `__typename`.
    #[error("Missing __typename for abstract type '{abstract_type}'")]
    MissingTypename {
        /// The interface or union being resolved.
        abstract_type: String,
    },

    /// A node type payload had no usable `id`.
    #[error("Missing id for node type '{type_name}'")]
    MissingNodeId {
        /// The node type.
        type_name: String,
    },

    /// A field value had the wrong JSON shape.
    #[error("Field '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        /// The field being decoded.
        field: String,
        /// Expected wire type.
        expected: &'static str,
        /// What the payload contained.
        found: String,
    },

    /// A non-null field was null.
    #[error("Field '{field}' is non-null but the payload contained null")]
    UnexpectedNull {
        /// The field being decoded.
        field: String,
    },

    /// An enum value is not a member of its enum.
    #[error("'{value}' is not a member of enum '{enum_name}'")]
    UnknownEnumMember {
        /// The enum type.
        enum_name: String,
        /// The offending value.
        value: String,
    },

    /// A custom scalar codec rejected the value.
    #[error("Invalid value for scalar '{scalar}': {message}")]
    InvalidScalar {
        /// The scalar type.
        scalar: String,
        /// Codec message.
        message: String,
    },

    /// A type referenced by the selection is missing from the schema tables.
    #[error("Unknown type '{0}'")]
    UnknownType(String),
}

impl DeserializeError {
    /// Create a type mismatch error.
    pub fn mismatch(field: impl Into<String>, expected: &'static str, found: &serde_json::Value) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found: json_kind(found).to_string(),
        }
    }

    /// Create an invalid scalar error.
    pub fn invalid_scalar(scalar: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidScalar {
            scalar: scalar.into(),
            message: message.into(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Contract violations reported synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// A required variable was not bound (or bound to null).
    #[error("Missing required variable '${0}'")]
    MissingVariable(String),

    /// Variables must be a JSON object.
    #[error("Operation variables must be a JSON object")]
    VariablesNotObject,

    /// The result was accessed before any data arrived.
    #[error("Operation '{0}' has no data yet")]
    NoData(String),
}

/// Inconsistent runtime schema tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A field or abstract type references a type that was never added.
    #[error("Type '{owner}' references unknown type '{referenced}'")]
    UnknownType {
        /// The referencing type.
        owner: String,
        /// The missing type.
        referenced: String,
    },

    /// Two types were registered under the same name.
    #[error("Type '{0}' is defined more than once")]
    DuplicateType(String),
}

/// Environment registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    /// An environment with this name is already registered.
    #[error("Environment '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No environment with this name is registered.
    #[error("Environment '{0}' is not registered")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mismatch_reports_json_kind() {
        let err = DeserializeError::mismatch("age", "integer", &json!("ten"));
        assert_eq!(err.to_string(), "Field 'age' expected integer, got string");
    }

    #[test]
    fn test_top_level_conversion() {
        let err: Error = OperationError::MissingVariable("id".into()).into();
        assert_eq!(err.to_string(), "Missing required variable '$id'");
        assert!(matches!(err, Error::Operation(_)));
    }

    #[test]
    fn test_graphql_errors_joined() {
        let err = Error::GraphQL(vec![GraphQLError::new("denied"), GraphQLError::new("bad id")]);
        assert_eq!(err.to_string(), "GraphQL error: denied; bad id");
    }
}
