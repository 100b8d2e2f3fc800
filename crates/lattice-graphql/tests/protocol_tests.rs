//! graphql-transport-ws state machine driven by hand.

mod common;

use std::sync::{Arc, Weak};

use lattice_graphql::ids::OperationId;
use lattice_graphql::operation::{OperationDefinition, OperationHandler, OperationState};
use lattice_graphql::protocol::{
    ConnectionState, GraphQLRequest, OperationStatus, ProtocolConnection, ProtocolMessage,
};
use lattice_graphql::selection::SelectionMask;
use lattice_graphql::transport::{Delivery, OperationSink};
use serde_json::{json, Value};

fn open(connection: &mut ProtocolConnection) {
    connection.begin_connect();
    assert_eq!(connection.state(), ConnectionState::Connecting);
    connection.transport_opened();
    assert_eq!(connection.state(), ConnectionState::HandshakeSent);
}

fn subscribe_id(message: &ProtocolMessage) -> String {
    match message {
        ProtocolMessage::Subscribe { id, .. } => id.clone(),
        other => panic!("expected subscribe, got {other:?}"),
    }
}

fn sink_of(handler: &Arc<OperationHandler>) -> Weak<dyn OperationSink> {
    let sink: Arc<dyn OperationSink> = handler.clone();
    Arc::downgrade(&sink)
}

fn next_frame(id: &str, data: Value) -> String {
    json!({"type": "next", "id": id, "payload": {"data": data}}).to_string()
}

fn dispatch(deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        delivery.dispatch();
    }
}

/// An operation handler whose frames the test routes through `connection`.
fn user_subscription(env_name: &str) -> (Arc<lattice_graphql::Environment>, Arc<OperationHandler>, OperationId) {
    let (env, _transport) = common::environment(env_name);
    let handler = env
        .operation(
            OperationDefinition::subscription(
                "UserChanged",
                "subscription UserChanged { userChanged { id name } }",
                "Subscription",
            )
            .mask(SelectionMask::new().select_with("userChanged", SelectionMask::fields(["id", "name"]))),
        )
        .unwrap();
    let op = handler.execute(json!({})).unwrap();
    (env, handler, op)
}

#[test]
fn test_init_payload_and_handshake_order() {
    let mut connection = ProtocolConnection::new(Some(json!({"Authorization": "Bearer t"})));
    connection.subscribe(
        OperationId::new(),
        GraphQLRequest::subscription("subscription { tick }"),
        Weak::<OperationHandler>::new(),
    );
    assert_eq!(connection.operation_count(), 1);
    open(&mut connection);

    let outbox = connection.drain_outbox();
    assert_eq!(
        outbox,
        vec![ProtocolMessage::ConnectionInit {
            payload: Some(json!({"Authorization": "Bearer t"}))
        }]
    );

    // Nothing is subscribed before the ack.
    assert!(connection.drain_outbox().is_empty());
    connection.receive(r#"{"type":"connection_ack"}"#);
    assert!(connection.is_ready());
    let outbox = connection.drain_outbox();
    assert_eq!(outbox.len(), 1);
    assert!(matches!(&outbox[0], ProtocolMessage::Subscribe { payload, .. } if payload.query == "subscription { tick }"));
}

#[test]
fn test_ping_answered_with_pong() {
    let mut connection = ProtocolConnection::new(None);
    open(&mut connection);
    connection.receive(r#"{"type":"connection_ack"}"#);
    connection.drain_outbox();

    connection.receive(r#"{"type":"ping","payload":{"n":1}}"#);
    assert_eq!(
        connection.drain_outbox(),
        vec![ProtocolMessage::Pong {
            payload: Some(json!({"n": 1}))
        }]
    );

    connection.ping();
    assert_eq!(connection.drain_outbox(), vec![ProtocolMessage::Ping { payload: None }]);
}

#[test]
fn test_malformed_frames_ignored() {
    let mut connection = ProtocolConnection::new(None);
    open(&mut connection);
    connection.drain_outbox();

    assert!(connection.receive("not json").is_empty());
    assert!(connection.receive(r#"{"type":"mystery"}"#).is_empty());
    assert!(connection.receive(r#"{"type":"next","id":"nobody","payload":{"data":{}}}"#).is_empty());
    assert_eq!(connection.state(), ConnectionState::HandshakeSent);

    connection.receive(r#"{"type":"connection_ack"}"#);
    assert!(connection.is_ready());
}

#[test]
fn test_frames_reach_operation_handler() {
    let (env, handler, op) = user_subscription("proto-route");
    let mut connection = ProtocolConnection::new(None);
    open(&mut connection);
    connection.receive(r#"{"type":"connection_ack"}"#);
    connection.drain_outbox();

    connection.subscribe(op, GraphQLRequest::subscription("subscription { userChanged { id name } }"), sink_of(&handler));
    let id = subscribe_id(&connection.drain_outbox()[0]);
    assert_eq!(connection.operation_status(op), Some(OperationStatus::Sent));

    for name in ["Ann", "Bea", "Cy"] {
        dispatch(connection.receive(&next_frame(&id, json!({"userChanged": {"id": "1", "name": name}}))));
    }
    assert_eq!(connection.operation_status(op), Some(OperationStatus::Streaming));
    dispatch(connection.receive(&json!({"type": "complete", "id": id}).to_string()));

    assert_eq!(handler.state(), OperationState::Completed);
    assert_eq!(connection.operation_count(), 0);
    let user = handler.data().unwrap().object("userChanged").unwrap();
    assert_eq!(user.string("name").as_deref(), Some("Cy"));

    handler.dispose();
    assert_eq!(env.node_count(), 0);
}

#[test]
fn test_reconnect_resubscribes_under_fresh_id() {
    let (_env, handler, op) = user_subscription("proto-reconnect");
    let mut connection = ProtocolConnection::new(None);
    open(&mut connection);
    connection.receive(r#"{"type":"connection_ack"}"#);
    connection.drain_outbox();

    connection.subscribe(op, GraphQLRequest::subscription("subscription { userChanged { id name } }"), sink_of(&handler));
    let old_id = subscribe_id(&connection.drain_outbox()[0]);
    dispatch(connection.receive(&next_frame(&old_id, json!({"userChanged": {"id": "1", "name": "Ann"}}))));

    connection.transport_lost();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.operation_status(op), Some(OperationStatus::Pending));
    assert_eq!(connection.correlation_id(op), None);

    open(&mut connection);
    connection.receive(r#"{"type":"connection_ack"}"#);
    let outbox = connection.drain_outbox();
    assert_eq!(outbox.len(), 2, "init then subscribe: {outbox:?}");
    let new_id = subscribe_id(&outbox[1]);
    assert_ne!(old_id, new_id);
    assert_eq!(connection.correlation_id(op), Some(new_id.as_str()));

    // A late frame under the superseded id goes nowhere.
    assert!(connection
        .receive(&next_frame(&old_id, json!({"userChanged": {"id": "1", "name": "Stale"}})))
        .is_empty());

    dispatch(connection.receive(&next_frame(&new_id, json!({"userChanged": {"id": "1", "name": "Bea"}}))));
    let user = handler.data().unwrap().object("userChanged").unwrap();
    assert_eq!(user.string("name").as_deref(), Some("Bea"));
}

#[test]
fn test_error_frame_routes_to_handler() {
    let (_env, handler, op) = user_subscription("proto-error");
    let mut connection = ProtocolConnection::new(None);
    open(&mut connection);
    connection.receive(r#"{"type":"connection_ack"}"#);
    connection.drain_outbox();

    connection.subscribe(op, GraphQLRequest::subscription("subscription { userChanged { id } }"), sink_of(&handler));
    let id = subscribe_id(&connection.drain_outbox()[0]);
    dispatch(connection.receive(
        &json!({"type": "error", "id": id, "payload": [{"message": "denied", "path": ["userChanged"]}]}).to_string(),
    ));

    assert_eq!(handler.state(), OperationState::Failed);
    assert_eq!(handler.errors()[0].to_string(), "denied (at userChanged)");
    assert_eq!(connection.operation_count(), 0);
}
