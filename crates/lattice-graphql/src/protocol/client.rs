//! WebSocket driver for the graphql-transport-ws protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lattice_graphql_core::Signal;
use lattice_graphql_core::logging::targets;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::connection::{ConnectionState, ProtocolConnection};
use super::message::SUBPROTOCOL;
use super::request::GraphQLRequest;
use crate::error::TransportError;
use crate::ids::OperationId;
use crate::transport::{Delivery, OperationSink, Transport};

/// Configuration for a [`ProtocolClient`].
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// The WebSocket URL (ws:// or wss://).
    pub url: String,
    /// Custom headers to send during the handshake.
    pub headers: HashMap<String, String>,
    /// Payload of `connection_init` (e.g. auth tokens).
    pub init_payload: Option<Value>,
    /// Time allowed for opening the socket.
    pub connection_timeout: Duration,
    /// Time allowed for the server to acknowledge `connection_init`.
    pub ack_timeout: Duration,
    /// Interval of client pings while ready. `None` disables keep-alive.
    pub keep_alive_interval: Option<Duration>,
    /// Auto-reconnect configuration. If `None`, a lost connection fails
    /// every active operation.
    pub reconnect: Option<ReconnectConfig>,
}

impl ProtocolConfig {
    /// Create a configuration for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            init_payload: None,
            connection_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            keep_alive_interval: Some(Duration::from_secs(30)),
            reconnect: None,
        }
    }

    /// Add a custom header for the WebSocket handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Authenticate with a bearer token, both as a handshake header and in
    /// the `connection_init` payload.
    pub fn bearer_auth(mut self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.headers.insert("Authorization".into(), value.clone());
        let payload = self.init_payload.get_or_insert_with(|| json!({}));
        if let Value::Object(map) = payload {
            map.insert("Authorization".into(), Value::String(value));
        }
        self
    }

    /// Set the `connection_init` payload.
    pub fn init_payload(mut self, payload: Value) -> Self {
        self.init_payload = Some(payload);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the keep-alive interval, or disable keep-alive with `None`.
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Enable auto-reconnect with default settings.
    pub fn auto_reconnect(mut self) -> Self {
        self.reconnect = Some(ReconnectConfig::default());
        self
    }

    /// Enable auto-reconnect with custom configuration.
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = Some(config);
        self
    }
}

/// Configuration for automatic reconnection.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts. `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial delay between reconnection attempts.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before reconnection attempt `attempt` (0-indexed), with ±10% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64) as i64;

        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0
        };

        Duration::from_millis((delay_ms + jitter).max(0) as u64)
    }
}

/// Connection-level signals of a [`ProtocolClient`].
#[derive(Debug, Default)]
pub struct ProtocolEvents {
    /// Emitted when the server acknowledges the connection.
    pub connected: Signal<()>,
    /// Emitted when the socket is lost or closed.
    pub disconnected: Signal<()>,
    /// Emitted on transport errors.
    pub error: Signal<TransportError>,
}

/// Command sent to the connection task.
enum Command {
    /// Write whatever the state machine queued.
    Flush,
    Close,
}

/// Outcome of one socket session.
enum SessionEnd {
    Closed,
    Lost,
}

/// A graphql-transport-ws client over tokio-tungstenite.
///
/// Implements [`Transport`]: operations subscribed before the connection is
/// ready are sent as soon as the server acknowledges it. When the socket
/// drops and reconnecting is enabled, every active operation is sent again
/// under a fresh id after the next acknowledgement.
///
/// # Example
///
/// ```no_run
/// use lattice_graphql::protocol::{ProtocolClient, ProtocolConfig};
///
/// # async fn run() {
/// let client = ProtocolClient::new(
///     ProtocolConfig::new("wss://api.example.com/graphql")
///         .bearer_auth("token")
///         .auto_reconnect(),
/// );
/// client.events().connected.connect(|_| println!("ready"));
/// client.connect();
/// # }
/// ```
pub struct ProtocolClient {
    config: ProtocolConfig,
    connection: Arc<Mutex<ProtocolConnection>>,
    command_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    is_running: Arc<AtomicBool>,
    events: Arc<ProtocolEvents>,
}

impl ProtocolClient {
    pub fn new(config: ProtocolConfig) -> Self {
        let connection = ProtocolConnection::new(config.init_payload.clone());
        Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
            command_tx: Arc::new(Mutex::new(None)),
            is_running: Arc::new(AtomicBool::new(false)),
            events: Arc::new(ProtocolEvents::default()),
        }
    }

    /// Connection signals.
    pub fn events(&self) -> &Arc<ProtocolEvents> {
        &self.events
    }

    /// Current protocol state.
    pub fn state(&self) -> ConnectionState {
        self.connection.lock().state()
    }

    pub fn is_ready(&self) -> bool {
        self.connection.lock().is_ready()
    }

    /// Number of operations the client is tracking.
    pub fn operation_count(&self) -> usize {
        self.connection.lock().operation_count()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Start the connection task. Must be called within a tokio runtime.
    ///
    /// If the task is already running, this is a no-op.
    pub fn connect(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let driver = Driver {
            config: self.config.clone(),
            connection: self.connection.clone(),
            command_tx: self.command_tx.clone(),
            is_running: self.is_running.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(driver.run());
    }

    /// Send a normal close frame and stop the connection task.
    pub fn close(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.command_tx.lock().as_ref() {
            let _ = tx.send(Command::Close);
        }
    }

    fn flush(&self) {
        if let Some(tx) = self.command_tx.lock().as_ref() {
            let _ = tx.send(Command::Flush);
        }
    }
}

impl Transport for ProtocolClient {
    fn subscribe(
        &self,
        operation_id: OperationId,
        request: GraphQLRequest,
        sink: Weak<dyn OperationSink>,
    ) -> Result<(), TransportError> {
        self.connection.lock().subscribe(operation_id, request, sink);
        self.flush();
        Ok(())
    }

    fn unsubscribe(&self, operation_id: OperationId) {
        self.connection.lock().unsubscribe(operation_id);
        self.flush();
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish()
    }
}

/// State moved into the connection task.
struct Driver {
    config: ProtocolConfig,
    connection: Arc<Mutex<ProtocolConnection>>,
    command_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    is_running: Arc<AtomicBool>,
    events: Arc<ProtocolEvents>,
}

impl Driver {
    async fn run(self) {
        let mut reconnect_attempt: u32 = 0;

        loop {
            self.connection.lock().begin_connect();

            let request = match Self::build_request(&self.config) {
                Ok(request) => request,
                Err(e) => {
                    self.stop(e);
                    return;
                }
            };

            let connect = tokio::time::timeout(
                self.config.connection_timeout,
                tokio_tungstenite::connect_async(request),
            )
            .await;

            match connect {
                Ok(Ok((mut ws_stream, _response))) => {
                    tracing::debug!(target: targets::PROTOCOL, url = %self.config.url, "socket open");
                    let (tx, rx) = mpsc::unbounded_channel::<Command>();
                    *self.command_tx.lock() = Some(tx);

                    // `close` clears the flag before it looks for a channel, so a
                    // close issued while connecting is seen here.
                    if !self.is_running.load(Ordering::SeqCst) {
                        *self.command_tx.lock() = None;
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: String::new().into(),
                        };
                        let _ = ws_stream.close(Some(frame)).await;
                        tracing::debug!(target: targets::PROTOCOL, "closed while connecting");
                        self.stop(TransportError::Closed);
                        return;
                    }
                    self.connection.lock().transport_opened();

                    let (end, acked) = self.session(ws_stream, rx).await;

                    *self.command_tx.lock() = None;
                    self.connection.lock().transport_lost();
                    self.events.disconnected.emit(());

                    if acked {
                        reconnect_attempt = 0;
                    }
                    if matches!(end, SessionEnd::Closed) {
                        self.stop(TransportError::Closed);
                        return;
                    }
                }
                Ok(Err(e)) => self.report(TransportError::WebSocket(e.to_string())),
                Err(_) => self.report(TransportError::ConnectTimeout(self.config.connection_timeout)),
            }

            let Some(reconnect) = &self.config.reconnect else {
                self.stop(TransportError::Closed);
                return;
            };

            if let Some(max) = reconnect.max_attempts
                && reconnect_attempt >= max
            {
                self.stop(TransportError::ReconnectExhausted { attempts: max });
                return;
            }

            let delay = reconnect.delay_for_attempt(reconnect_attempt);
            tracing::debug!(target: targets::PROTOCOL, attempt = reconnect_attempt, ?delay, "reconnecting");
            tokio::time::sleep(delay).await;

            if !self.is_running.load(Ordering::SeqCst) {
                self.stop(TransportError::Closed);
                return;
            }
            reconnect_attempt += 1;
        }
    }

    /// Pump one socket until it closes. Returns how it ended and whether the
    /// server acknowledged the connection.
    async fn session<S>(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<S>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> (SessionEnd, bool)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();
        let ack_deadline = Instant::now() + self.config.ack_timeout;
        let mut keep_alive: Option<Interval> = None;
        let mut acked = false;

        loop {
            let outgoing = self.connection.lock().drain_outbox();
            for message in outgoing {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        self.report(TransportError::from(e));
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    self.report(TransportError::WebSocket(e.to_string()));
                    return (SessionEnd::Lost, acked);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep_until(ack_deadline), if !acked => {
                    self.report(TransportError::HandshakeTimeout(self.config.ack_timeout));
                    let _ = write.close().await;
                    return (SessionEnd::Lost, acked);
                }
                _ = tick(&mut keep_alive) => {
                    self.connection.lock().ping();
                }
                command = commands.recv() => match command {
                    Some(Command::Flush) => {}
                    Some(Command::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: String::new().into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        return (SessionEnd::Closed, acked);
                    }
                },
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let (deliveries, became_ready) = {
                            let mut connection = self.connection.lock();
                            let deliveries = connection.receive(text.as_str());
                            (deliveries, !acked && connection.is_ready())
                        };
                        if became_ready {
                            acked = true;
                            keep_alive = self.config.keep_alive_interval.map(|period| {
                                tokio::time::interval_at(Instant::now() + period, period)
                            });
                            self.events.connected.emit(());
                        }
                        dispatch(deliveries);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(target: targets::PROTOCOL, ?frame, "server closed connection");
                        return (SessionEnd::Lost, acked);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.report(TransportError::WebSocket(e.to_string()));
                        return (SessionEnd::Lost, acked);
                    }
                    None => return (SessionEnd::Lost, acked),
                },
            }
        }
    }

    fn report(&self, error: TransportError) {
        tracing::warn!(target: targets::PROTOCOL, %error, "transport error");
        self.events.error.emit(error);
    }

    /// Fail every active operation and end the task.
    fn stop(&self, error: TransportError) {
        if !matches!(error, TransportError::Closed) {
            self.report(error.clone());
        }
        let deliveries = self.connection.lock().fail_all(&error);
        self.connection.lock().transport_lost();
        self.is_running.store(false, Ordering::SeqCst);
        dispatch(deliveries);
    }

    fn build_request(
        config: &ProtocolConfig,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TransportError> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            ::http::header::SEC_WEBSOCKET_PROTOCOL,
            ::http::header::HeaderValue::from_static(SUBPROTOCOL),
        );
        for (name, value) in &config.headers {
            let header_name = ::http::header::HeaderName::try_from(name.as_str())
                .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
            let header_value = ::http::header::HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        Ok(request)
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn dispatch(deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        delivery.dispatch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let config = ReconnectConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(1000))
            .backoff_multiplier(2.0);

        let first = config.delay_for_attempt(0).as_millis();
        assert!((90..=110).contains(&first));
        let third = config.delay_for_attempt(2).as_millis();
        assert!((360..=440).contains(&third));
        let capped = config.delay_for_attempt(20).as_millis();
        assert!((900..=1100).contains(&capped));
    }

    #[test]
    fn test_bearer_auth_sets_header_and_payload() {
        let config = ProtocolConfig::new("ws://localhost/graphql").bearer_auth("abc");
        assert_eq!(config.headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
        assert_eq!(config.init_payload.unwrap()["Authorization"], "Bearer abc");
    }

    #[test]
    fn test_build_request_adds_subprotocol() {
        let config = ProtocolConfig::new("ws://localhost:4000/graphql").header("X-Client", "lattice");
        let request = Driver::build_request(&config).unwrap();
        assert_eq!(request.headers()["Sec-WebSocket-Protocol"], SUBPROTOCOL);
        assert_eq!(request.headers()["X-Client"], "lattice");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let config = ProtocolConfig::new("ws://localhost/graphql").header("bad header", "x");
        assert!(matches!(
            Driver::build_request(&config),
            Err(TransportError::InvalidHeader(_))
        ));
    }
}
