//! Entity options and message types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Name of the match-all rule every subscription starts with
pub const DEFAULT_RULE_NAME: &str = "$Default";

/// Queue creation options
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    pub name: String,
    pub lock_duration: Duration,
    pub max_delivery_count: u32,
    pub max_size_mb: u64,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lock_duration: Duration::from_secs(60),
            max_delivery_count: 10,
            max_size_mb: 1024,
        }
    }
}

/// Topic creation options
#[derive(Debug, Clone, PartialEq)]
pub struct TopicOptions {
    pub name: String,
    pub max_size_mb: u64,
}

impl TopicOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_size_mb: 1024,
        }
    }
}

/// Subscription creation options
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionOptions {
    pub topic: String,
    pub name: String,
}

impl SubscriptionOptions {
    pub fn new(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            name: name.into(),
        }
    }
}

/// Named SQL filter rule attached to a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOptions {
    pub name: String,
    pub filter: String,
}

impl RuleOptions {
    pub fn new(name: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: filter.into(),
        }
    }
}

/// Where a receiver pulls messages from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReceiveSource {
    Queue(String),
    Subscription { topic: String, subscription: String },
}

impl ReceiveSource {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self::Subscription {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }

    /// Entity path as addressed on the broker
    pub fn path(&self) -> String {
        match self {
            Self::Queue(name) => name.clone(),
            Self::Subscription {
                topic,
                subscription,
            } => format!("{}/subscriptions/{}", topic, subscription),
        }
    }

    /// Topic the source belongs to, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Queue(_) => None,
            Self::Subscription { topic, .. } => Some(topic),
        }
    }
}

impl fmt::Display for ReceiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A message on its way to the broker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub correlation_id: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// A message fetched under a peek-lock
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: Bytes,
    pub message_id: String,
    pub lock_token: String,
    pub sequence_number: i64,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}
