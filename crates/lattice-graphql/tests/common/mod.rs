//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Weak};

use lattice_graphql::error::TransportError;
use lattice_graphql::ids::OperationId;
use lattice_graphql::protocol::{GraphQLError, GraphQLRequest, GraphQLResponse};
use lattice_graphql::schema::{FieldType, ObjectType, Schema};
use lattice_graphql::transport::{OperationSink, Transport};
use lattice_graphql::Environment;
use parking_lot::Mutex;
use serde_json::Value;

/// A small social schema:
///
/// - `User` node: `name`, `email?`, `posts?: [Post]`, `bestFriend?: User`
/// - `Post` node: `title`, `author?: User`
/// - `Bot` value: `model`
/// - `Actor = User | Bot`
/// - roots `Query { user?, users, me?: Actor }` and
///   `Subscription { userChanged?: User }`
pub fn schema() -> Schema {
    Schema::builder()
        .object(
            ObjectType::node("User")
                .field("name", FieldType::string())
                .nullable("email", FieldType::string())
                .nullable("posts", FieldType::list(FieldType::object("Post")))
                .nullable("bestFriend", FieldType::object("User")),
        )
        .object(
            ObjectType::node("Post")
                .field("title", FieldType::string())
                .nullable("author", FieldType::object("User")),
        )
        .object(ObjectType::new("Bot").field("model", FieldType::string()))
        .union("Actor", ["User", "Bot"])
        .object(
            ObjectType::new("Query")
                .nullable("user", FieldType::object("User"))
                .field("users", FieldType::list(FieldType::object("User")))
                .nullable("me", FieldType::polymorphic("Actor")),
        )
        .object(ObjectType::new("Subscription").nullable("userChanged", FieldType::object("User")))
        .build()
        .expect("fixture schema is consistent")
}

/// Environment over [`schema`] and a fresh [`RecordingTransport`].
pub fn environment(name: &str) -> (Arc<Environment>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let env = Environment::new(name, schema(), transport.clone());
    (env, transport)
}

struct Subscription {
    operation_id: OperationId,
    request: GraphQLRequest,
    sink: Weak<dyn OperationSink>,
}

/// A transport that records calls and lets the test play the server.
#[derive(Default)]
pub struct RecordingTransport {
    subscriptions: Mutex<Vec<Subscription>>,
    unsubscribed: Mutex<Vec<OperationId>>,
    refuse: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    /// Make the next `subscribe` call fail.
    pub fn refuse_next(&self, error: TransportError) {
        *self.refuse.lock() = Some(error);
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn request(&self, operation_id: OperationId) -> Option<GraphQLRequest> {
        self.subscriptions
            .lock()
            .iter()
            .find(|s| s.operation_id == operation_id)
            .map(|s| s.request.clone())
    }

    pub fn unsubscribed(&self) -> Vec<OperationId> {
        self.unsubscribed.lock().clone()
    }

    fn sink(&self, operation_id: OperationId) -> Option<Arc<dyn OperationSink>> {
        self.subscriptions
            .lock()
            .iter()
            .find(|s| s.operation_id == operation_id)
            .and_then(|s| s.sink.upgrade())
    }

    pub fn next(&self, operation_id: OperationId, data: Value) {
        self.respond(operation_id, GraphQLResponse::from_data(data));
    }

    pub fn respond(&self, operation_id: OperationId, response: GraphQLResponse) {
        if let Some(sink) = self.sink(operation_id) {
            sink.on_next(operation_id, response);
        }
    }

    pub fn error(&self, operation_id: OperationId, errors: Vec<GraphQLError>) {
        if let Some(sink) = self.sink(operation_id) {
            sink.on_error(operation_id, errors);
        }
    }

    pub fn complete(&self, operation_id: OperationId) {
        if let Some(sink) = self.sink(operation_id) {
            sink.on_complete(operation_id);
        }
    }

    pub fn fail(&self, operation_id: OperationId, error: TransportError) {
        if let Some(sink) = self.sink(operation_id) {
            sink.on_transport_failed(operation_id, &error);
        }
    }
}

impl Transport for RecordingTransport {
    fn subscribe(
        &self,
        operation_id: OperationId,
        request: GraphQLRequest,
        sink: Weak<dyn OperationSink>,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.refuse.lock().take() {
            return Err(error);
        }
        self.subscriptions.lock().push(Subscription {
            operation_id,
            request,
            sink,
        });
        Ok(())
    }

    fn unsubscribe(&self, operation_id: OperationId) {
        self.unsubscribed.lock().push(operation_id);
    }
}
