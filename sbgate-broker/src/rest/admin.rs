//! Entity management over Atom XML

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Method, StatusCode};
use std::sync::Arc;
use tracing::info;

use super::atom;
use super::{encode_path, status_error, RestTransport};
use crate::client::AdminClient;
use crate::error::BrokerError;
use crate::types::{QueueOptions, RuleOptions, SubscriptionOptions, TopicOptions};

fn subscription_path(topic: &str, subscription: &str) -> String {
    format!("{}/Subscriptions/{}", topic, subscription)
}

/// Management client for a Service Bus namespace
pub struct RestAdmin {
    transport: Arc<RestTransport>,
}

impl RestAdmin {
    pub fn new(transport: Arc<RestTransport>) -> Self {
        Self { transport }
    }

    /// Whether `path` exists and is described by `description`
    async fn exists(&self, path: &str, description: &str) -> Result<bool, BrokerError> {
        let request = self.transport.request(Method::GET, &encode_path(path), &[])?;
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, body));
        }
        atom::describes(&body, description)
    }

    async fn put_entry(&self, path: &str, body: String) -> Result<(), BrokerError> {
        let request = self
            .transport
            .request(Method::PUT, &encode_path(path), &[])?
            .header(CONTENT_TYPE, atom::ENTRY_CONTENT_TYPE)
            .body(body);
        self.transport.execute(request).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), BrokerError> {
        let request = self
            .transport
            .request(Method::DELETE, &encode_path(path), &[])?;
        self.transport.execute(request).await?;
        Ok(())
    }

    async fn list(&self, kind: &str, skip: usize, top: usize) -> Result<Vec<String>, BrokerError> {
        let request = self.transport.request(
            Method::GET,
            &format!("$Resources/{}", kind),
            &[("$skip", skip.to_string()), ("$top", top.to_string())],
        )?;
        let body = self.transport.execute(request).await?.text().await?;
        atom::entry_titles(&body)
    }
}

#[async_trait]
impl AdminClient for RestAdmin {
    async fn queue_exists(&self, name: &str) -> Result<bool, BrokerError> {
        self.exists(name, atom::QUEUE_DESCRIPTION).await
    }

    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError> {
        self.exists(name, atom::TOPIC_DESCRIPTION).await
    }

    async fn subscription_exists(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<bool, BrokerError> {
        self.exists(
            &subscription_path(topic, subscription),
            atom::SUBSCRIPTION_DESCRIPTION,
        )
        .await
    }

    async fn create_queue(&self, options: &QueueOptions) -> Result<(), BrokerError> {
        info!(name = %options.name, "Creating queue");
        self.put_entry(&options.name, atom::queue_entry(options)).await
    }

    async fn create_topic(&self, options: &TopicOptions) -> Result<(), BrokerError> {
        info!(name = %options.name, "Creating topic");
        self.put_entry(&options.name, atom::topic_entry(options)).await
    }

    async fn create_subscription(&self, options: &SubscriptionOptions) -> Result<(), BrokerError> {
        info!(topic = %options.topic, name = %options.name, "Creating subscription");
        self.put_entry(
            &subscription_path(&options.topic, &options.name),
            atom::subscription_entry(),
        )
        .await
    }

    async fn create_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &RuleOptions,
    ) -> Result<(), BrokerError> {
        info!(topic = %topic, subscription = %subscription, rule = %rule.name, "Creating rule");
        let path = format!("{}/Rules/{}", subscription_path(topic, subscription), rule.name);
        self.put_entry(&path, atom::rule_entry(rule)).await
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.delete(name).await
    }

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError> {
        self.delete(name).await
    }

    async fn delete_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<(), BrokerError> {
        self.delete(&subscription_path(topic, subscription)).await
    }

    async fn list_queues(&self, skip: usize, top: usize) -> Result<Vec<String>, BrokerError> {
        self.list("Queues", skip, top).await
    }

    async fn list_topics(&self, skip: usize, top: usize) -> Result<Vec<String>, BrokerError> {
        self.list("Topics", skip, top).await
    }
}
