//! Broker client traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;
use crate::types::{
    OutgoingMessage, QueueOptions, ReceiveSource, ReceivedMessage, RuleOptions,
    SubscriptionOptions, TopicOptions,
};

/// Administrative operations against a broker namespace
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Check if a queue exists
    async fn queue_exists(&self, name: &str) -> Result<bool, BrokerError>;

    /// Check if a topic exists
    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError>;

    /// Check if a subscription exists
    async fn subscription_exists(&self, topic: &str, subscription: &str)
        -> Result<bool, BrokerError>;

    /// Create a queue
    async fn create_queue(&self, options: &QueueOptions) -> Result<(), BrokerError>;

    /// Create a topic
    async fn create_topic(&self, options: &TopicOptions) -> Result<(), BrokerError>;

    /// Create a subscription with the match-all default rule
    async fn create_subscription(&self, options: &SubscriptionOptions) -> Result<(), BrokerError>;

    /// Attach a named rule to a subscription
    async fn create_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &RuleOptions,
    ) -> Result<(), BrokerError>;

    /// Delete a queue
    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Delete a topic and its subscriptions
    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError>;

    /// Delete a subscription
    async fn delete_subscription(&self, topic: &str, subscription: &str)
        -> Result<(), BrokerError>;

    /// One page of queue names
    async fn list_queues(&self, skip: usize, top: usize) -> Result<Vec<String>, BrokerError>;

    /// One page of topic names
    async fn list_topics(&self, skip: usize, top: usize) -> Result<Vec<String>, BrokerError>;
}

/// Factory for senders and receivers sharing one connection
pub trait MessagingClient: Send + Sync {
    /// Sender for a queue or topic
    fn create_sender(&self, entity: &str) -> Arc<dyn MessageSender>;

    /// Peek-lock receiver for a queue or subscription
    fn create_receiver(&self, source: &ReceiveSource) -> Arc<dyn MessageReceiver>;
}

/// Sends messages to one queue or topic
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn entity(&self) -> &str;

    /// Send for immediate delivery
    async fn send(&self, message: &OutgoingMessage) -> Result<(), BrokerError>;

    /// Hold the message on the broker until `at`
    async fn schedule(&self, message: &OutgoingMessage, at: DateTime<Utc>)
        -> Result<(), BrokerError>;

    async fn close(&self);
}

/// Receives and completes messages from one queue or subscription
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    fn source(&self) -> &ReceiveSource;

    /// Fetch up to `max_messages`, waiting at most `max_wait` for the first
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// Settle a message so it is removed from the entity
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BrokerError>;

    async fn close(&self);
}
