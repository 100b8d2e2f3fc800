//! GraphQL response types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A GraphQL error returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                match segment {
                    PathSegment::Field(name) if i > 0 => write!(f, ".{name}")?,
                    PathSegment::Field(name) => write!(f, "{name}")?,
                    PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// One execution result: the payload of a `next` frame or an HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// The data returned by the operation.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors that occurred during execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Additional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// A response carrying only data.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the response has data and no errors.
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.errors.is_empty()
    }

    /// All error messages joined, if any.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }
}
