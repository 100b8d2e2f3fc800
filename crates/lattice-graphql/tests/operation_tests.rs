//! Operation lifecycle against a scripted transport.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use lattice_graphql::error::{DeserializeError, Error, OperationError, SchemaError, TransportError};
use lattice_graphql::ids::{NodeId, OperationId};
use lattice_graphql::operation::{OperationDefinition, OperationState};
use lattice_graphql::protocol::{GraphQLError, GraphQLResponse};
use lattice_graphql::selection::SelectionMask;
use parking_lot::Mutex;
use serde_json::json;

fn user_mask() -> SelectionMask {
    SelectionMask::fields(["id", "name"]).select_with("posts", SelectionMask::fields(["id", "title"]))
}

fn get_user() -> OperationDefinition {
    OperationDefinition::query(
        "GetUser",
        "query GetUser($id: ID!) { user(id: $id) { id name posts { id title } } }",
        "Query",
    )
    .mask(SelectionMask::new().select_with("user", user_mask()))
    .required_variable("id")
}

fn user_changed() -> OperationDefinition {
    OperationDefinition::subscription(
        "UserChanged",
        "subscription UserChanged { userChanged { id name posts { id title } } }",
        "Subscription",
    )
    .mask(SelectionMask::new().select_with("userChanged", user_mask()))
}

fn ids(ids: &[&str]) -> HashSet<NodeId> {
    ids.iter().map(|id| NodeId::from(*id)).collect()
}

#[test]
fn test_subscription_streams_then_completes() {
    let (env, transport) = common::environment("op-stream");
    let handler = env.operation(user_changed()).unwrap();
    let states = Arc::new(Mutex::new(Vec::new()));
    {
        let states = states.clone();
        handler.state_changed.connect(move |state| states.lock().push(*state));
    }

    let op = handler.execute(json!({})).unwrap();
    assert_eq!(handler.state(), OperationState::Sent);
    assert!(matches!(handler.data(), Err(Error::Operation(OperationError::NoData(_)))));
    assert!(transport.request(op).unwrap().is_subscription());

    transport.next(
        op,
        json!({"userChanged": {"id": "1", "name": "Ann", "posts": [{"id": "p1", "title": "One"}]}}),
    );
    let root = handler.data().unwrap();
    let user = root.object("userChanged").unwrap();
    assert_eq!(handler.state(), OperationState::Streaming);

    transport.next(
        op,
        json!({"userChanged": {"id": "1", "name": "Ann2", "posts": [
            {"id": "p1", "title": "One"}, {"id": "p2", "title": "Two"}
        ]}}),
    );
    transport.next(
        op,
        json!({"userChanged": {"id": "1", "name": "Ann3", "posts": [{"id": "p2", "title": "Two"}]}}),
    );

    // Merged in place into the same root.
    assert!(Arc::ptr_eq(&root, &handler.data().unwrap()));
    assert_eq!(user.string("name").as_deref(), Some("Ann3"));
    assert_eq!(user.list("posts").unwrap().node_ids(), vec![NodeId::from("p2")]);
    // p1 only belonged to an earlier snapshot.
    assert!(env.lookup(&NodeId::from("p1")).is_none());
    assert_eq!(handler.retained_nodes(), ids(&["1", "p2"]));

    transport.complete(op);
    assert_eq!(handler.state(), OperationState::Completed);
    assert_eq!(
        *states.lock(),
        vec![OperationState::Sent, OperationState::Streaming, OperationState::Completed]
    );

    // Frames after completion are ignored.
    transport.next(op, json!({"userChanged": {"id": "1", "name": "Late", "posts": []}}));
    assert_eq!(user.string("name").as_deref(), Some("Ann3"));

    handler.dispose();
    assert_eq!(handler.state(), OperationState::Idle);
    assert_eq!(env.node_count(), 0);
    handler.dispose();
}

#[test]
fn test_dispose_spares_shared_nodes() {
    let (env, transport) = common::environment("op-shared");
    let handler = env.operation(user_changed()).unwrap();
    let op = handler.execute(json!(null)).unwrap();
    transport.next(
        op,
        json!({"userChanged": {"id": "1", "name": "Ann", "posts": [{"id": "p1", "title": "One"}]}}),
    );

    let other = OperationId::new();
    env.merge(other, "Post", &json!({"id": "p1", "title": "One"}), &SelectionMask::fields(["title"]))
        .unwrap();

    drop(handler);
    assert_eq!(env.with_store_mut(|store| store.node_ids()), vec![NodeId::from("p1")]);
    assert!(transport.unsubscribed().contains(&op));
}

#[test]
fn test_refetch_replaces_root_and_releases_old_nodes() {
    let (env, transport) = common::environment("op-refetch");
    let handler = env.operation(get_user()).unwrap();

    let first = handler.execute(json!({"id": "1"})).unwrap();
    transport.next(
        first,
        json!({"user": {"id": "1", "name": "Ann", "posts": [{"id": "p1", "title": "One"}]}}),
    );
    transport.complete(first);
    let old_root = handler.data().unwrap();
    let user = old_root.object("user").unwrap();

    let second = handler.refetch().unwrap();
    assert_ne!(first, second);
    assert_eq!(handler.operation_id(), Some(second));
    assert_eq!(handler.state(), OperationState::Sent);
    assert!(transport.unsubscribed().is_empty(), "completed execution needs no unsubscribe");
    assert_eq!(transport.request(second).unwrap().variables, Some(json!({"id": "1"})));

    // Old data stays until the new execution answers.
    assert!(Arc::ptr_eq(&old_root, &handler.data().unwrap()));
    assert!(env.lookup(&NodeId::from("p1")).is_some());

    transport.next(
        second,
        json!({"user": {"id": "1", "name": "Ann", "posts": [{"id": "p2", "title": "Two"}]}}),
    );
    let new_root = handler.data().unwrap();
    assert!(!Arc::ptr_eq(&old_root, &new_root));
    assert!(Arc::ptr_eq(&user, &new_root.object("user").unwrap()));
    assert!(env.lookup(&NodeId::from("p1")).is_none());
    assert_eq!(handler.retained_nodes(), ids(&["1", "p2"]));
    assert_eq!(
        env.with_store_mut(|store| store.retainers(&NodeId::from("1"))),
        vec![second]
    );
}

#[test]
fn test_superseded_execution_is_unsubscribed_and_ignored() {
    let (env, transport) = common::environment("op-superseded");
    let handler = env.operation(get_user()).unwrap();

    let first = handler.execute(json!({"id": "1"})).unwrap();
    let second = handler.execute(json!({"id": "2"})).unwrap();
    assert_eq!(transport.unsubscribed(), vec![first]);
    assert_eq!(handler.variables(), json!({"id": "2"}));

    transport.next(first, json!({"user": {"id": "1", "name": "Ann", "posts": []}}));
    assert!(handler.data().is_err());
    assert_eq!(env.node_count(), 0);

    transport.next(second, json!({"user": {"id": "2", "name": "Bo", "posts": []}}));
    let user = handler.data().unwrap().object("user").unwrap();
    assert_eq!(user.string("name").as_deref(), Some("Bo"));
}

#[test]
fn test_error_frame_fails_and_keeps_data() {
    let (env, transport) = common::environment("op-error");
    let handler = env.operation(user_changed()).unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = errors.clone();
        handler.error.connect(move |e| errors.lock().push(e.to_string()));
    }

    let op = handler.execute(json!({})).unwrap();
    transport.next(op, json!({"userChanged": {"id": "1", "name": "Ann", "posts": []}}));
    transport.error(op, vec![GraphQLError::new("not allowed")]);

    assert_eq!(handler.state(), OperationState::Failed);
    assert_eq!(handler.errors(), vec![GraphQLError::new("not allowed")]);
    assert!(matches!(handler.last_error(), Some(Error::GraphQL(_))));
    assert_eq!(*errors.lock(), vec!["GraphQL error: not allowed".to_string()]);
    let user = handler.data().unwrap().object("userChanged").unwrap();
    assert_eq!(user.string("name").as_deref(), Some("Ann"));
}

#[test]
fn test_errors_inside_result_do_not_fail() {
    let (env, transport) = common::environment("op-partial");
    let handler = env.operation(get_user()).unwrap();
    let op = handler.execute(json!({"id": "1"})).unwrap();

    transport.respond(
        op,
        GraphQLResponse {
            data: Some(json!({"user": null})),
            errors: vec![GraphQLError::new("user hidden")],
            extensions: None,
        },
    );
    assert_eq!(handler.state(), OperationState::Streaming);
    assert_eq!(handler.errors().len(), 1);
    assert!(handler.data().unwrap().object("user").is_none());
}

#[test]
fn test_merge_failure_fails_operation() {
    let (env, transport) = common::environment("op-deserialize");
    let handler = env.operation(user_changed()).unwrap();
    let op = handler.execute(json!({})).unwrap();

    transport.next(op, json!({"userChanged": {"name": "no id"}}));
    assert_eq!(handler.state(), OperationState::Failed);
    assert!(matches!(
        handler.last_error(),
        Some(Error::Deserialize(DeserializeError::MissingNodeId { .. }))
    ));
    assert_eq!(transport.unsubscribed(), vec![op]);

    transport.next(op, json!({"userChanged": {"id": "1", "name": "Ann", "posts": []}}));
    assert_eq!(handler.state(), OperationState::Failed);
    assert_eq!(env.node_count(), 0);
}

#[test]
fn test_transport_failures() {
    let (env, transport) = common::environment("op-transport");
    let handler = env.operation(user_changed()).unwrap();

    let op = handler.execute(json!({})).unwrap();
    transport.fail(op, TransportError::ReconnectExhausted { attempts: 3 });
    assert_eq!(handler.state(), OperationState::Failed);
    assert!(matches!(
        handler.last_error(),
        Some(Error::Transport(TransportError::ReconnectExhausted { attempts: 3 }))
    ));

    transport.refuse_next(TransportError::Unsupported("no streaming".into()));
    let err = handler.execute(json!({})).unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Unsupported(_))));
    assert_eq!(handler.state(), OperationState::Failed);
}

#[test]
fn test_execute_validates_variables() {
    let (env, transport) = common::environment("op-variables");
    let handler = env.operation(get_user()).unwrap();

    let err = handler.execute(json!({})).unwrap_err();
    assert!(matches!(err, Error::Operation(OperationError::MissingVariable(ref name)) if name == "id"));
    let err = handler.execute(json!("id")).unwrap_err();
    assert!(matches!(err, Error::Operation(OperationError::VariablesNotObject)));

    assert_eq!(transport.subscribe_count(), 0);
    assert_eq!(handler.state(), OperationState::Idle);
    assert_eq!(handler.operation_id(), None);
}

#[test]
fn test_unknown_root_type() {
    let (env, _transport) = common::environment("op-root");
    let err = env
        .operation(OperationDefinition::query("Q", "{ x }", "Nope"))
        .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::UnknownType { .. })));
}

#[test]
fn test_polymorphic_root_field() {
    let (env, transport) = common::environment("op-union");
    let mask = SelectionMask::new().select_with(
        "me",
        SelectionMask::fields(["__typename"])
            .on_type("User", SelectionMask::fields(["__typename", "id", "name"]))
            .on_type("Bot", SelectionMask::fields(["__typename", "model"])),
    );
    let handler = env
        .operation(OperationDefinition::query("Me", "{ me { __typename ... } }", "Query").mask(mask))
        .unwrap();

    let op = handler.execute(json!({})).unwrap();
    transport.next(op, json!({"me": {"__typename": "User", "id": "9", "name": "Ann"}}));
    let me = handler.data().unwrap().object("me").unwrap();
    assert_eq!(me.type_name(), "User");
    assert_eq!(me.id(), Some(NodeId::from("9")));

    let op = handler.refetch().unwrap();
    transport.next(op, json!({"me": {"__typename": "Bot", "model": "R2"}}));
    let me = handler.data().unwrap().object("me").unwrap();
    assert_eq!(me.type_name(), "Bot");
    assert_eq!(me.string("model").as_deref(), Some("R2"));
    assert_eq!(env.node_count(), 0);
}
