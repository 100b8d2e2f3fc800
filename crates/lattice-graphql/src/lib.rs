//! GraphQL client runtime for lattice.
//!
//! This crate executes GraphQL operations over a streaming transport and keeps
//! their results in a normalized, reactive cache:
//!
//! - **Node cache**: every object with an `id` lives once per [`Environment`]
//!   in a [`NodeStore`], retained by the operations that reached it and
//!   evicted when the last one lets go
//! - **Mask-aware merging**: results are merged according to the fields the
//!   operation selected; only fields whose value changed notify
//! - **Lists**: one-to-many fields are [`ListContainer`]s replaced wholesale
//!   with a single reset notification
//! - **Operations**: [`OperationHandler`] drives a query, mutation or
//!   subscription through its lifecycle
//! - **Transports**: graphql-transport-ws over a WebSocket
//!   ([`ProtocolClient`]) and plain HTTP POST ([`HttpTransport`])
//!
//! # Identity sharing
//!
//! Two operations that fetch the same node see the same instance:
//!
//! ```
//! use lattice_graphql::ids::OperationId;
//! use lattice_graphql::protocol::{ProtocolClient, ProtocolConfig};
//! use lattice_graphql::schema::{FieldType, ObjectType, Schema};
//! use lattice_graphql::selection::SelectionMask;
//! use lattice_graphql::Environment;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let schema = Schema::builder()
//!     .object(ObjectType::node("User").field("name", FieldType::string()))
//!     .build()
//!     .unwrap();
//! let transport = Arc::new(ProtocolClient::new(ProtocolConfig::new("ws://localhost:4000/graphql")));
//! let env = Environment::new("identity-doc", schema, transport);
//!
//! let first = env
//!     .merge(OperationId::new(), "User", &json!({"id": "42", "name": "Ann"}), &SelectionMask::fields(["id", "name"]))
//!     .unwrap();
//! let second = env
//!     .merge(OperationId::new(), "User", &json!({"id": "42", "name": "Ann2"}), &SelectionMask::fields(["name"]))
//!     .unwrap();
//!
//! let (a, b) = (first.get().unwrap(), second.get().unwrap());
//! assert!(Arc::ptr_eq(&a, &b));
//! assert_eq!(a.string("name").as_deref(), Some("Ann2"));
//! ```
//!
//! # Operations
//!
//! ```no_run
//! use lattice_graphql::environment::{self, Environment};
//! use lattice_graphql::operation::OperationDefinition;
//! use lattice_graphql::protocol::{ProtocolClient, ProtocolConfig};
//! use lattice_graphql::schema::{FieldType, ObjectType, Schema};
//! use lattice_graphql::selection::SelectionMask;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> lattice_graphql::Result<()> {
//! let schema = Schema::builder()
//!     .object(ObjectType::node("User").field("name", FieldType::string()))
//!     .object(ObjectType::new("Subscription").nullable("userChanged", FieldType::object("User")))
//!     .build()?;
//!
//! let client = Arc::new(ProtocolClient::new(
//!     ProtocolConfig::new("wss://api.example.com/graphql").auto_reconnect(),
//! ));
//! client.connect();
//!
//! let env = Environment::new("main", schema, client);
//! environment::register(env.clone())?;
//!
//! let handler = env.operation(
//!     OperationDefinition::subscription(
//!         "UserChanged",
//!         "subscription UserChanged { userChanged { id name } }",
//!         "Subscription",
//!     )
//!     .mask(SelectionMask::new().select_with("userChanged", SelectionMask::fields(["id", "name"]))),
//! )?;
//! handler.data_changed.connect(|_| println!("user changed"));
//! handler.execute(json!({}))?;
//! # Ok(())
//! # }
//! ```

pub mod environment;
pub mod error;
pub mod ids;
pub mod list;
pub mod merge;
pub mod object;
pub mod operation;
pub mod protocol;
pub mod scalars;
pub mod schema;
pub mod selection;
pub mod store;
pub mod transport;

pub use environment::Environment;
pub use error::{DeserializeError, EnvironmentError, Error, OperationError, Result, SchemaError, TransportError};
pub use ids::{NodeId, OperationId};
pub use lattice_graphql_core::{ConnectionId, Property, Signal};
pub use list::ListContainer;
pub use object::{FieldValue, NodeHandle, ObjectHandle, ObjectInstance};
pub use operation::{OperationDefinition, OperationHandler, OperationState};
pub use protocol::{GraphQLError, GraphQLRequest, GraphQLResponse, OperationType, ProtocolClient, ProtocolConfig};
pub use scalars::{CustomScalar, EnumType, Scalar, ScalarType};
pub use schema::{FieldType, ObjectType, Schema};
pub use selection::SelectionMask;
pub use store::NodeStore;
pub use transport::{HttpTransport, HttpTransportConfig, OperationSink, Transport};
