//! Send, peek-lock receive and complete over HTTPS

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::utf8_percent_encode;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{encode_path, RestTransport, COMPONENT};
use crate::client::{MessageReceiver, MessageSender, MessagingClient};
use crate::error::BrokerError;
use crate::types::{OutgoingMessage, ReceiveSource, ReceivedMessage};

const BROKER_PROPERTIES: &str = "BrokerProperties";

/// Broker-owned message metadata sent as a JSON header
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutgoingProperties<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_enqueue_time_utc: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceivedProperties {
    lock_token: Option<String>,
    message_id: Option<String>,
    #[serde(default)]
    sequence_number: i64,
    #[serde(default)]
    delivery_count: u32,
    enqueued_time_utc: Option<String>,
}

/// RFC 1123 date as used in BrokerProperties
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Sender and receiver factory over a shared transport
pub struct RestMessaging {
    transport: Arc<RestTransport>,
}

impl RestMessaging {
    pub fn new(transport: Arc<RestTransport>) -> Self {
        Self { transport }
    }
}

impl MessagingClient for RestMessaging {
    fn create_sender(&self, entity: &str) -> Arc<dyn MessageSender> {
        Arc::new(RestSender {
            transport: self.transport.clone(),
            entity: entity.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn create_receiver(&self, source: &ReceiveSource) -> Arc<dyn MessageReceiver> {
        Arc::new(RestReceiver {
            transport: self.transport.clone(),
            path: encode_path(&source.path()),
            source: source.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

struct RestSender {
    transport: Arc<RestTransport>,
    entity: String,
    closed: AtomicBool,
}

impl RestSender {
    fn build(
        &self,
        message: &OutgoingMessage,
        at: Option<DateTime<Utc>>,
    ) -> Result<RequestBuilder, BrokerError> {
        let properties = OutgoingProperties {
            message_id: message.message_id.as_deref(),
            label: message.subject.as_deref(),
            correlation_id: message.correlation_id.as_deref(),
            scheduled_enqueue_time_utc: at.map(http_date),
        };
        let broker_properties = serde_json::to_string(&properties)
            .map_err(|e| BrokerError::BadRequest(e.to_string()))?;

        let path = format!("{}/messages", encode_path(&self.entity));
        let mut request = self
            .transport
            .request(Method::POST, &path, &[])?
            .header(BROKER_PROPERTIES, broker_properties)
            .header(
                CONTENT_TYPE,
                message
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            );

        for (name, value) in &message.properties {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| BrokerError::BadRequest(format!("Invalid property name: {}", name)))?;
            // String properties travel as JSON string literals
            let quoted = serde_json::Value::String(value.clone()).to_string();
            let value = HeaderValue::from_str(&quoted)
                .map_err(|_| BrokerError::BadRequest(format!("Invalid value for property {}", name)))?;
            request = request.header(header, value);
        }

        Ok(request.body(message.body.clone()))
    }
}

#[async_trait]
impl MessageSender for RestSender {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let request = self.build(message, None)?;
        self.transport.execute(request).await?;
        debug!(entity = %self.entity, "Message sent");
        Ok(())
    }

    async fn schedule(
        &self,
        message: &OutgoingMessage,
        at: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let request = self.build(message, Some(at))?;
        self.transport.execute(request).await?;
        debug!(entity = %self.entity, at = %at, "Message scheduled");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct RestReceiver {
    transport: Arc<RestTransport>,
    source: ReceiveSource,
    path: String,
    closed: AtomicBool,
}

impl RestReceiver {
    /// Peek-lock the head message; `None` once the entity is drained
    async fn receive_one(&self, timeout_secs: u64) -> Result<Option<ReceivedMessage>, BrokerError> {
        let request = self.transport.request(
            Method::POST,
            &format!("{}/messages/head", self.path),
            &[("timeout", timeout_secs.to_string())],
        )?;
        let response = self.transport.execute(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let properties = response
            .headers()
            .get(BROKER_PROPERTIES)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BrokerError::Unexpected {
                status: response.status().as_u16(),
                message: "Response has no BrokerProperties".to_string(),
            })?;
        let properties: ReceivedProperties =
            serde_json::from_str(properties).map_err(|e| BrokerError::Unexpected {
                status: response.status().as_u16(),
                message: format!("Invalid BrokerProperties: {}", e),
            })?;

        let lock_token = properties.lock_token.ok_or_else(|| BrokerError::Unexpected {
            status: response.status().as_u16(),
            message: "Locked message has no LockToken".to_string(),
        })?;
        let enqueued_at = properties
            .enqueued_time_utc
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
            .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

        let body = response.bytes().await?;
        Ok(Some(ReceivedMessage {
            body,
            message_id: properties.message_id.unwrap_or_default(),
            lock_token,
            sequence_number: properties.sequence_number,
            delivery_count: properties.delivery_count,
            enqueued_at,
        }))
    }
}

#[async_trait]
impl MessageReceiver for RestReceiver {
    fn source(&self) -> &ReceiveSource {
        &self.source
    }

    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            // Only the first fetch long-polls; the rest drain what is ready
            let timeout = if batch.is_empty() { max_wait.as_secs() } else { 0 };
            match self.receive_one(timeout).await {
                Ok(Some(message)) => batch.push(message),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                // Messages already locked are handed back rather than dropped
                Err(e) => {
                    warn!(source = %self.source, error = %e, fetched = batch.len(), "Receive stopped early");
                    break;
                }
            }
        }
        debug!(source = %self.source, count = batch.len(), "Received messages");
        Ok(batch)
    }

    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let path = format!(
            "{}/messages/{}/{}",
            self.path,
            utf8_percent_encode(&message.message_id, COMPONENT),
            utf8_percent_encode(&message.lock_token, COMPONENT),
        );
        let request = self.transport.request(Method::DELETE, &path, &[])?;
        match self.transport.execute(request).await {
            Ok(_) => Ok(()),
            Err(BrokerError::NotFound(m)) | Err(BrokerError::LockLost(m)) => {
                Err(BrokerError::LockLost(m))
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
