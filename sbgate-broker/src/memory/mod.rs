//! In-memory broker
//!
//! Provides an in-process broker with support for:
//! - Queue, topic and subscription administration
//! - Immediate and scheduled sends, topic fan-out through rule filters
//! - Peek-lock receive and complete, with lock expiry

mod store;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{AdminClient, MessageReceiver, MessageSender, MessagingClient};
use crate::error::BrokerError;
use crate::filter::SqlFilter;
use crate::types::{
    OutgoingMessage, QueueOptions, ReceiveSource, ReceivedMessage, RuleOptions,
    SubscriptionOptions, TopicOptions, DEFAULT_RULE_NAME,
};
use store::{MessageStore, StoredMessage};

/// Lock duration for subscriptions, which are created without options
const SUBSCRIPTION_LOCK_DURATION: Duration = Duration::from_secs(60);

const SUBSCRIPTION_MAX_DELIVERY_COUNT: u32 = 10;

struct QueueEntity {
    store: Arc<MessageStore>,
}

struct TopicEntity {
    options: TopicOptions,
    subscriptions: DashMap<String, Arc<SubscriptionEntity>>,
}

struct Rule {
    name: String,
    filter: SqlFilter,
}

struct SubscriptionEntity {
    rules: RwLock<Vec<Rule>>,
    store: Arc<MessageStore>,
}

impl SubscriptionEntity {
    /// Rules are OR-combined
    fn accepts(&self, message: &OutgoingMessage) -> bool {
        self.rules.read().iter().any(|r| r.filter.matches(message))
    }
}

#[derive(Default)]
struct BrokerState {
    queues: DashMap<String, Arc<QueueEntity>>,
    topics: DashMap<String, Arc<TopicEntity>>,
    sequence: AtomicI64,
}

impl BrokerState {
    fn store_for(&self, source: &ReceiveSource) -> Result<Arc<MessageStore>, BrokerError> {
        match source {
            ReceiveSource::Queue(name) => self
                .queues
                .get(name)
                .map(|q| q.store.clone())
                .ok_or_else(|| BrokerError::NotFound(name.clone())),
            ReceiveSource::Subscription {
                topic,
                subscription,
            } => self
                .topics
                .get(topic)
                .ok_or_else(|| BrokerError::NotFound(topic.clone()))?
                .subscriptions
                .get(subscription)
                .map(|s| s.store.clone())
                .ok_or_else(|| BrokerError::NotFound(source.path())),
        }
    }

    fn stored(&self, message: &OutgoingMessage) -> StoredMessage {
        StoredMessage {
            sequence_number: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            message_id: message
                .message_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            message: message.clone(),
            enqueued_at: Utc::now(),
            delivery_count: 0,
        }
    }

    /// Deliver to a queue, or fan out to every matching subscription of a topic
    fn publish(
        &self,
        entity: &str,
        message: &OutgoingMessage,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<i64, BrokerError> {
        let stored = self.stored(message);
        let sequence_number = stored.sequence_number;

        let deliver = |store: &MessageStore, stored: StoredMessage| match due_at {
            Some(at) if at > Utc::now() => store.schedule(stored, at),
            _ => store.enqueue(stored),
        };

        if let Some(queue) = self.queues.get(entity).map(|q| q.value().clone()) {
            deliver(queue.store.as_ref(), stored)?;
            debug!(queue = %entity, sequence_number, "Message accepted");
            return Ok(sequence_number);
        }

        let topic = self
            .topics
            .get(entity)
            .map(|t| t.value().clone())
            .ok_or_else(|| BrokerError::NotFound(entity.to_string()))?;

        let targets: Vec<(String, Arc<SubscriptionEntity>)> = topic
            .subscriptions
            .iter()
            .map(|s| (s.key().clone(), s.value().clone()))
            .collect();

        let mut delivered = 0;
        for (name, subscription) in targets {
            if subscription.accepts(message) {
                deliver(subscription.store.as_ref(), stored.clone())?;
                delivered += 1;
            } else {
                debug!(topic = %entity, subscription = %name, "Message filtered out");
            }
        }
        debug!(topic = %entity, sequence_number, delivered, "Message fanned out");
        Ok(sequence_number)
    }
}

/// In-process broker implementing both client traits
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page(mut names: Vec<String>, skip: usize, top: usize) -> Vec<String> {
    names.sort();
    names.into_iter().skip(skip).take(top).collect()
}

#[async_trait]
impl AdminClient for MemoryBroker {
    async fn queue_exists(&self, name: &str) -> Result<bool, BrokerError> {
        Ok(self.state.queues.contains_key(name))
    }

    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError> {
        Ok(self.state.topics.contains_key(name))
    }

    async fn subscription_exists(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<bool, BrokerError> {
        Ok(self
            .state
            .topics
            .get(topic)
            .is_some_and(|t| t.subscriptions.contains_key(subscription)))
    }

    async fn create_queue(&self, options: &QueueOptions) -> Result<(), BrokerError> {
        if self.state.topics.contains_key(&options.name) {
            return Err(BrokerError::AlreadyExists(options.name.clone()));
        }
        match self.state.queues.entry(options.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BrokerError::AlreadyExists(options.name.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(
                    name = %options.name,
                    lock_duration = ?options.lock_duration,
                    max_delivery_count = options.max_delivery_count,
                    max_size_mb = options.max_size_mb,
                    "Creating queue"
                );
                entry.insert(Arc::new(QueueEntity {
                    store: Arc::new(MessageStore::new(
                        options.lock_duration,
                        options.max_delivery_count,
                        options.max_size_mb,
                    )),
                }));
                Ok(())
            }
        }
    }

    async fn create_topic(&self, options: &TopicOptions) -> Result<(), BrokerError> {
        if self.state.queues.contains_key(&options.name) {
            return Err(BrokerError::AlreadyExists(options.name.clone()));
        }
        match self.state.topics.entry(options.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BrokerError::AlreadyExists(options.name.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(name = %options.name, max_size_mb = options.max_size_mb, "Creating topic");
                entry.insert(Arc::new(TopicEntity {
                    options: options.clone(),
                    subscriptions: DashMap::new(),
                }));
                Ok(())
            }
        }
    }

    async fn create_subscription(&self, options: &SubscriptionOptions) -> Result<(), BrokerError> {
        let topic = self
            .state
            .topics
            .get(&options.topic)
            .map(|t| t.value().clone())
            .ok_or_else(|| BrokerError::NotFound(options.topic.clone()))?;

        let created = match topic.subscriptions.entry(options.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BrokerError::AlreadyExists(
                format!("{}/subscriptions/{}", options.topic, options.name),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(topic = %options.topic, name = %options.name, "Creating subscription");
                entry.insert(Arc::new(SubscriptionEntity {
                    rules: RwLock::new(vec![Rule {
                        name: DEFAULT_RULE_NAME.to_string(),
                        filter: SqlFilter::match_all(),
                    }]),
                    store: Arc::new(MessageStore::new(
                        SUBSCRIPTION_LOCK_DURATION,
                        SUBSCRIPTION_MAX_DELIVERY_COUNT,
                        topic.options.max_size_mb,
                    )),
                }));
                Ok(())
            }
        };
        created
    }

    async fn create_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &RuleOptions,
    ) -> Result<(), BrokerError> {
        let filter = SqlFilter::parse(&rule.filter)?;

        let entity = self
            .state
            .topics
            .get(topic)
            .ok_or_else(|| BrokerError::NotFound(topic.to_string()))?
            .subscriptions
            .get(subscription)
            .map(|s| s.value().clone())
            .ok_or_else(|| {
                BrokerError::NotFound(format!("{}/subscriptions/{}", topic, subscription))
            })?;

        let mut rules = entity.rules.write();
        if rules.iter().any(|r| r.name == rule.name) {
            return Err(BrokerError::AlreadyExists(rule.name.clone()));
        }
        info!(topic = %topic, subscription = %subscription, rule = %rule.name, filter = %rule.filter, "Creating rule");
        rules.push(Rule {
            name: rule.name.clone(),
            filter,
        });
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.state
            .queues
            .remove(name)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;
        info!(name = %name, "Deleted queue");
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError> {
        let (_, topic) = self
            .state
            .topics
            .remove(name)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;
        info!(name = %name, subscriptions = topic.subscriptions.len(), "Deleted topic");
        Ok(())
    }

    async fn delete_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<(), BrokerError> {
        let entity = self
            .state
            .topics
            .get(topic)
            .map(|t| t.value().clone())
            .ok_or_else(|| BrokerError::NotFound(topic.to_string()))?;
        entity
            .subscriptions
            .remove(subscription)
            .ok_or_else(|| {
                BrokerError::NotFound(format!("{}/subscriptions/{}", topic, subscription))
            })?;
        info!(topic = %topic, name = %subscription, "Deleted subscription");
        Ok(())
    }

    async fn list_queues(&self, skip: usize, top: usize) -> Result<Vec<String>, BrokerError> {
        let names = self.state.queues.iter().map(|q| q.key().clone()).collect();
        Ok(page(names, skip, top))
    }

    async fn list_topics(&self, skip: usize, top: usize) -> Result<Vec<String>, BrokerError> {
        let names = self.state.topics.iter().map(|t| t.key().clone()).collect();
        Ok(page(names, skip, top))
    }
}

impl MessagingClient for MemoryBroker {
    fn create_sender(&self, entity: &str) -> Arc<dyn MessageSender> {
        Arc::new(MemorySender {
            state: self.state.clone(),
            entity: entity.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn create_receiver(&self, source: &ReceiveSource) -> Arc<dyn MessageReceiver> {
        Arc::new(MemoryReceiver {
            state: self.state.clone(),
            source: source.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

struct MemorySender {
    state: Arc<BrokerState>,
    entity: String,
    closed: AtomicBool,
}

#[async_trait]
impl MessageSender for MemorySender {
    fn entity(&self) -> &str {
        &self.entity
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.state.publish(&self.entity, message, None).map(|_| ())
    }

    async fn schedule(
        &self,
        message: &OutgoingMessage,
        at: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.state.publish(&self.entity, message, Some(at)).map(|_| ())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryReceiver {
    state: Arc<BrokerState>,
    source: ReceiveSource,
    closed: AtomicBool,
}

#[async_trait]
impl MessageReceiver for MemoryReceiver {
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
        let store = self.state.store_for(&self.source)?;
        Ok(store.receive(max_messages, max_wait).await)
    }

    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let store = self.state.store_for(&self.source)?;
        store.complete(&message.lock_token)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
