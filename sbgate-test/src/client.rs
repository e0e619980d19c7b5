//! Client for interacting with sbgate

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

/// One entry of a receive response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReceivedPayload {
    pub success: bool,
    pub payload: Option<String>,
    pub encoding: Option<String>,
}

/// Client for the sbgate HTTP surface
pub struct SbgateClient {
    base_url: String,
    client: Client,
}

impl SbgateClient {
    /// Create a new client
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn expect_ok<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::UnexpectedStatus { status, body });
        }
        Ok(response.json().await?)
    }

    /// Whether `/health` reports the server as running
    pub async fn health(&self) -> Result<bool, ClientError> {
        let response = self.client.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    // === Management ===

    /// Create a queue with default settings
    pub async fn create_queue(&self, name: &str) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .post(self.url("/queues/create"))
            .query(&[("name", name)])
            .send()
            .await?;
        Ok(response.status())
    }

    /// Create a topic with default settings
    pub async fn create_topic(&self, name: &str) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .post(self.url("/topics/create"))
            .query(&[("name", name)])
            .send()
            .await?;
        Ok(response.status())
    }

    /// Create a subscription, optionally with a `(rule name, filter)` rule
    pub async fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
        rule: Option<(&str, &str)>,
    ) -> Result<StatusCode, ClientError> {
        let mut query = vec![("topicName", topic), ("subscriptionName", subscription)];
        if let Some((name, filter)) = rule {
            query.push(("ruleName", name));
            query.push(("filter", filter));
        }
        let response = self
            .client
            .post(self.url("/subscriptions/create"))
            .query(&query)
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn delete_queue(&self, name: &str) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("/queues/{}", name)))
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn delete_topic(&self, name: &str) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("/topics/{}", name)))
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn delete_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("/subscriptions/{}/{}", topic, subscription)))
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn list_queues(&self) -> Result<Vec<String>, ClientError> {
        let response = self.client.get(self.url("/queues")).send().await?;
        Self::expect_ok(response).await
    }

    pub async fn list_topics(&self) -> Result<Vec<String>, ClientError> {
        let response = self.client.get(self.url("/topics")).send().await?;
        Self::expect_ok(response).await
    }

    // === Transfer ===

    /// Send a text message to a queue or topic (`kind` is `queues` or `topics`)
    pub async fn send(
        &self,
        kind: &str,
        name: &str,
        body: &str,
        schedule_at: Option<&str>,
        properties: &[(&str, &str)],
    ) -> Result<StatusCode, ClientError> {
        let mut request = self
            .client
            .post(self.url(&format!("/{}/{}/send", kind, name)))
            .header("content-type", "text/plain")
            .body(body.to_string());
        if let Some(at) = schedule_at {
            request = request.query(&[("scheduleAt", at)]);
        }
        for (property, value) in properties {
            request = request.header(format!("x-property-{}", property), *value);
        }
        Ok(request.send().await?.status())
    }

    pub async fn send_to_queue(&self, queue: &str, body: &str) -> Result<StatusCode, ClientError> {
        self.send("queues", queue, body, None, &[]).await
    }

    pub async fn send_to_topic(&self, topic: &str, body: &str) -> Result<StatusCode, ClientError> {
        self.send("topics", topic, body, None, &[]).await
    }

    pub async fn receive_from_queue(
        &self,
        queue: &str,
        count: usize,
    ) -> Result<Vec<ReceivedPayload>, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/queues/{}/receive", queue)))
            .query(&[("messageCount", count)])
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    pub async fn receive_from_subscription(
        &self,
        topic: &str,
        subscription: &str,
        count: usize,
    ) -> Result<Vec<ReceivedPayload>, ClientError> {
        let response = self
            .client
            .get(self.url(&format!(
                "/topics/{}/subscriptions/{}/receive",
                topic, subscription
            )))
            .query(&[("messageCount", count)])
            .send()
            .await?;
        Self::expect_ok(response).await
    }
}
