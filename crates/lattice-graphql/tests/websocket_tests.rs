//! ProtocolClient against a local graphql-transport-ws server.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lattice_graphql::error::{Error, TransportError};
use lattice_graphql::operation::{OperationDefinition, OperationHandler, OperationState};
use lattice_graphql::protocol::{
    ConnectionState, GraphQLResponse, ProtocolClient, ProtocolConfig, ProtocolMessage, ReconnectConfig, SUBPROTOCOL,
};
use lattice_graphql::selection::SelectionMask;
use lattice_graphql::Environment;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerSocket = WebSocketStream<TcpStream>;

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(stream, |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        assert_eq!(
            request.headers().get("sec-websocket-protocol").and_then(|v| v.to_str().ok()),
            Some(SUBPROTOCOL)
        );
        response
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_static(SUBPROTOCOL));
        Ok(response)
    })
    .await
    .unwrap()
}

async fn accept_after(listener: &TcpListener, delay: Duration) -> ServerSocket {
    tokio::time::sleep(delay).await;
    accept(listener).await
}

async fn read_frame(socket: &mut ServerSocket) -> Option<ProtocolMessage> {
    while let Some(message) = socket.next().await {
        match message.ok()? {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_frame(socket: &mut ServerSocket, message: ProtocolMessage) {
    let text = serde_json::to_string(&message).unwrap();
    socket.send(Message::Text(text.into())).await.unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn subscribe(env: &Arc<Environment>) -> Arc<OperationHandler> {
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
    handler.execute(json!({})).unwrap();
    handler
}

fn config(addr: SocketAddr) -> ProtocolConfig {
    ProtocolConfig::new(format!("ws://{addr}/graphql")).keep_alive_interval(None)
}

#[tokio::test]
async fn test_subscription_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let init = read_frame(&mut socket).await;
        assert!(matches!(init, Some(ProtocolMessage::ConnectionInit { .. })));
        send_frame(&mut socket, ProtocolMessage::ConnectionAck { payload: None }).await;

        let Some(ProtocolMessage::Subscribe { id, payload }) = read_frame(&mut socket).await else {
            panic!("expected subscribe");
        };
        assert_eq!(payload.operation_name.as_deref(), Some("UserChanged"));

        send_frame(&mut socket, ProtocolMessage::Ping { payload: None }).await;
        assert_eq!(read_frame(&mut socket).await, Some(ProtocolMessage::Pong { payload: None }));

        for name in ["Ann", "Bea", "Cy"] {
            send_frame(
                &mut socket,
                ProtocolMessage::Next {
                    id: id.clone(),
                    payload: GraphQLResponse::from_data(json!({"userChanged": {"id": "1", "name": name}})),
                },
            )
            .await;
        }
        send_frame(&mut socket, ProtocolMessage::Complete { id }).await;

        // Drain until the client closes.
        while read_frame(&mut socket).await.is_some() {}
    });

    let client = Arc::new(ProtocolClient::new(config(addr)));
    let connected = Arc::new(Mutex::new(0));
    {
        let connected = connected.clone();
        client.events().connected.connect(move |_| *connected.lock() += 1);
    }
    let env = Environment::new("ws-round-trip", common::schema(), client.clone());
    let handler = subscribe(&env);
    client.connect();

    wait_until(|| handler.state() == OperationState::Completed).await;
    assert_eq!(*connected.lock(), 1);
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.operation_count(), 0);
    let user = handler.data().unwrap().object("userChanged").unwrap();
    assert_eq!(user.string("name").as_deref(), Some("Cy"));

    client.close();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_ack_fails_operations() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let init = read_frame(&mut socket).await;
        assert!(matches!(init, Some(ProtocolMessage::ConnectionInit { .. })));
        // Never acknowledge.
        while read_frame(&mut socket).await.is_some() {}
    });

    let client = Arc::new(ProtocolClient::new(
        config(addr).ack_timeout(Duration::from_millis(100)),
    ));
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = errors.clone();
        client.events().error.connect(move |e| errors.lock().push(e.clone()));
    }
    let env = Environment::new("ws-no-ack", common::schema(), client.clone());
    let handler = subscribe(&env);
    client.connect();

    wait_until(|| handler.state() == OperationState::Failed).await;
    assert!(matches!(handler.last_error(), Some(Error::Transport(TransportError::Closed))));
    assert!(
        errors
            .lock()
            .iter()
            .any(|e| matches!(e, TransportError::HandshakeTimeout(_)))
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_reconnect_exhaustion_fails_operations() {
    // Reserve a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = Arc::new(ProtocolClient::new(
        config(addr)
            .connection_timeout(Duration::from_secs(1))
            .reconnect_config(
                ReconnectConfig::new()
                    .max_attempts(1)
                    .initial_delay(Duration::from_millis(10)),
            ),
    ));
    let env = Environment::new("ws-exhausted", common::schema(), client.clone());
    let handler = subscribe(&env);
    client.connect();

    wait_until(|| handler.state() == OperationState::Failed).await;
    assert!(matches!(
        handler.last_error(),
        Some(Error::Transport(TransportError::ReconnectExhausted { attempts: 1 }))
    ));
    assert_eq!(client.operation_count(), 0);
}

#[tokio::test]
async fn test_close_while_connecting_stops_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut socket = accept_after(&listener, Duration::from_millis(200)).await;
        let mut frames = Vec::new();
        while let Some(frame) = read_frame(&mut socket).await {
            frames.push(frame);
        }
        frames
    });

    let client = Arc::new(ProtocolClient::new(config(addr)));
    let env = Environment::new("ws-close-connecting", common::schema(), client.clone());
    let handler = subscribe(&env);
    client.connect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);
    client.close();

    wait_until(|| handler.state() == OperationState::Failed).await;
    assert!(matches!(handler.last_error(), Some(Error::Transport(TransportError::Closed))));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The socket opened after the close never carries a handshake.
    let frames = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(frames.is_empty(), "{frames:?}");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
