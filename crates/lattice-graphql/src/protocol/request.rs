//! GraphQL request types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

/// The request payload of one operation execution.
///
/// Serializes to `{query, variables, operationName, extensions}`, the body
/// of an HTTP POST and the payload of a `subscribe` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLRequest {
    /// The GraphQL document.
    pub query: String,

    /// Variables for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Operation name (for documents with multiple operations).
    #[serde(skip_serializing_if = "Option::is_none", rename = "operationName")]
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,

    /// The operation type (not serialized).
    #[serde(skip)]
    pub(crate) operation_type: OperationType,
}

impl GraphQLRequest {
    /// Create a request for a document of a known operation type.
    pub fn new(query: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
            extensions: None,
            operation_type,
        }
    }

    /// Create a query request.
    pub fn query(query: impl Into<String>) -> Self {
        Self::new(query, OperationType::Query)
    }

    /// Create a mutation request.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::new(query, OperationType::Mutation)
    }

    /// Create a subscription request.
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::new(query, OperationType::Subscription)
    }

    /// Set a variable value.
    ///
    /// # Example
    ///
    /// ```
    /// use lattice_graphql::protocol::GraphQLRequest;
    ///
    /// let request = GraphQLRequest::query("query($id: ID!) { user(id: $id) { name } }")
    ///     .variable("id", "123")
    ///     .variable("limit", 10);
    /// assert_eq!(request.variables.unwrap()["limit"], 10);
    /// ```
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Replace all variables.
    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set extensions.
    pub fn extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }
}
