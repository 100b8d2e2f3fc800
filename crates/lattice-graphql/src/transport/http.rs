//! GraphQL over HTTP POST.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use lattice_graphql_core::logging::targets;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::task::JoinHandle;

use super::{Delivery, DeliveryEvent, OperationSink, Transport};
use crate::error::TransportError;
use crate::ids::OperationId;
use crate::protocol::{GraphQLRequest, GraphQLResponse};

/// Configuration for an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// The GraphQL endpoint.
    pub url: String,
    /// Headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Authenticate with a bearer token.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("Authorization", value)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs queries and mutations as one POST each.
///
/// A successful response is delivered as one result followed by completion.
/// A response carrying errors and no data is delivered as an error.
/// Subscriptions are rejected.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    tasks: Arc<Mutex<HashMap<OperationId, JoinHandle<()>>>>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            url: config.url,
            client,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Number of requests in flight.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    async fn execute(
        client: reqwest::Client,
        url: String,
        request: GraphQLRequest,
    ) -> Result<GraphQLResponse, TransportError> {
        let response = client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Transport for HttpTransport {
    fn subscribe(
        &self,
        operation_id: OperationId,
        request: GraphQLRequest,
        sink: Weak<dyn OperationSink>,
    ) -> Result<(), TransportError> {
        if request.is_subscription() {
            return Err(TransportError::Unsupported(
                "subscriptions require a streaming transport".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Unsupported(e.to_string()))?;

        let client = self.client.clone();
        let url = self.url.clone();
        let tasks = self.tasks.clone();

        let mut in_flight = self.tasks.lock();
        if let Some(previous) = in_flight.remove(&operation_id) {
            previous.abort();
        }
        let handle = runtime.spawn(async move {
            tracing::debug!(target: targets::TRANSPORT, %operation_id, %url, "POST");
            let result = Self::execute(client, url, request).await;
            if tasks.lock().remove(&operation_id).is_none() {
                // Unsubscribed while the request was in flight.
                return;
            }
            let events = match result {
                Ok(response) if response.data.is_none() && response.has_errors() => {
                    vec![DeliveryEvent::Error(response.errors)]
                }
                Ok(response) => vec![DeliveryEvent::Next(response), DeliveryEvent::Complete],
                Err(error) => {
                    tracing::warn!(target: targets::TRANSPORT, %operation_id, %error, "request failed");
                    vec![DeliveryEvent::Failed(error)]
                }
            };
            for event in events {
                Delivery::new(operation_id, event, sink.clone()).dispatch();
            }
        });
        in_flight.insert(operation_id, handle);
        Ok(())
    }

    fn unsubscribe(&self, operation_id: OperationId) {
        if let Some(handle) = self.tasks.lock().remove(&operation_id) {
            handle.abort();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header() {
        let config = HttpTransportConfig::new("http://localhost").header("bad header", "x");
        assert!(matches!(
            HttpTransport::new(config),
            Err(TransportError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_bearer_auth() {
        let config = HttpTransportConfig::new("http://localhost").bearer_auth("t");
        assert_eq!(config.headers["Authorization"], "Bearer t");
    }
}
