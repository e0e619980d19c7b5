//! Message transfer facade
//!
//! Senders and receivers are pooled per target and reused across requests.
//! Entries are evicted when their entity is deleted and closed on shutdown.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use sbgate_broker::{
    BrokerError, MessageReceiver, MessageSender, MessagingClient, OutgoingMessage, ReceiveSource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::outcome::Outcome;
use crate::retry::RetryPolicy;

pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(5);

/// One fetched message; `payload` is absent when completion failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveResult {
    pub success: bool,
    pub payload: Option<Bytes>,
}

pub struct TransferFacade {
    messaging: Arc<dyn MessagingClient>,
    retry: RetryPolicy,
    receive_wait: Duration,
    senders: DashMap<String, Arc<dyn MessageSender>>,
    receivers: DashMap<ReceiveSource, Arc<dyn MessageReceiver>>,
    closed: AtomicBool,
}

impl TransferFacade {
    pub fn new(messaging: Arc<dyn MessagingClient>, retry: RetryPolicy, receive_wait: Duration) -> Self {
        Self {
            messaging,
            retry,
            receive_wait,
            senders: DashMap::new(),
            receivers: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn sender(&self, target: &str) -> Arc<dyn MessageSender> {
        self.senders
            .entry(target.to_string())
            .or_insert_with(|| {
                debug!(target = %target, "Creating sender");
                self.messaging.create_sender(target)
            })
            .clone()
    }

    fn receiver(&self, source: &ReceiveSource) -> Arc<dyn MessageReceiver> {
        self.receivers
            .entry(source.clone())
            .or_insert_with(|| {
                debug!(source = %source, "Creating receiver");
                self.messaging.create_receiver(source)
            })
            .clone()
    }

    /// Send now, or hold on the broker until `schedule_at`
    pub async fn send_message(
        &self,
        target: &str,
        message: &OutgoingMessage,
        schedule_at: Option<DateTime<Utc>>,
    ) -> Outcome {
        if self.closed.load(Ordering::Acquire) {
            return Outcome::TransportError(BrokerError::Closed.to_string());
        }

        let sender = self.sender(target);
        let sender = &sender;
        let result = match schedule_at {
            None => self.retry.run_at_most_once("send", move || sender.send(message)).await,
            Some(at) => {
                self.retry
                    .run_at_most_once("schedule", move || sender.schedule(message, at))
                    .await
            }
        };

        match result {
            Ok(()) => {
                debug!(target = %target, scheduled = schedule_at.is_some(), "Message sent");
                Outcome::Success
            }
            Err(e) => {
                if e.is_not_found() {
                    self.evict_sender(target).await;
                }
                let outcome = Outcome::from_broker_error(&e);
                info!(target = %target, error = %e, "Send failed");
                outcome
            }
        }
    }

    /// Fetch up to `count` messages and complete each one
    ///
    /// Results keep fetch order. A failed completion only marks its own
    /// entry as unsuccessful.
    pub async fn receive_messages(
        &self,
        source: &ReceiveSource,
        count: usize,
    ) -> Result<Vec<ReceiveResult>, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        let receiver = self.receiver(source);
        let receiver = &receiver;
        let wait = self.receive_wait;
        let messages = match self
            .retry
            .run("receive", move || receiver.receive(count, wait))
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                if e.is_not_found() {
                    self.evict_receiver(source).await;
                }
                info!(source = %source, error = %e, "Receive failed");
                return Err(e);
            }
        };

        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            match receiver.complete(&message).await {
                Ok(()) => results.push(ReceiveResult {
                    success: true,
                    payload: Some(message.body),
                }),
                Err(e) => {
                    info!(
                        source = %source,
                        sequence_number = message.sequence_number,
                        error = %e,
                        "Complete failed"
                    );
                    results.push(ReceiveResult {
                        success: false,
                        payload: None,
                    });
                }
            }
        }
        debug!(source = %source, requested = count, received = results.len(), "Received messages");
        Ok(results)
    }

    pub async fn evict_sender(&self, target: &str) {
        if let Some((_, sender)) = self.senders.remove(target) {
            debug!(target = %target, "Evicting sender");
            sender.close().await;
        }
    }

    pub async fn evict_receiver(&self, source: &ReceiveSource) {
        if let Some((_, receiver)) = self.receivers.remove(source) {
            debug!(source = %source, "Evicting receiver");
            receiver.close().await;
        }
    }

    /// Drop pooled clients for a deleted queue
    pub async fn evict_queue(&self, name: &str) {
        self.evict_sender(name).await;
        self.evict_receiver(&ReceiveSource::queue(name)).await;
    }

    /// Drop pooled clients for a deleted topic and all of its subscriptions
    pub async fn evict_topic(&self, name: &str) {
        self.evict_sender(name).await;
        let sources: Vec<ReceiveSource> = self
            .receivers
            .iter()
            .filter(|entry| entry.key().topic() == Some(name))
            .map(|entry| entry.key().clone())
            .collect();
        for source in sources {
            self.evict_receiver(&source).await;
        }
    }

    /// Close every pooled client and refuse further work
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let senders: Vec<String> = self.senders.iter().map(|e| e.key().clone()).collect();
        let receivers: Vec<ReceiveSource> =
            self.receivers.iter().map(|e| e.key().clone()).collect();
        join_all(senders.iter().map(|target| self.evict_sender(target))).await;
        join_all(receivers.iter().map(|source| self.evict_receiver(source))).await;
        info!("Closed pooled senders and receivers");
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbgate_broker::memory::MemoryBroker;
    use sbgate_broker::{AdminClient, QueueOptions, SubscriptionOptions, TopicOptions};

    fn facade(broker: &MemoryBroker) -> TransferFacade {
        TransferFacade::new(
            Arc::new(broker.clone()),
            RetryPolicy::none(),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_send_then_receive_in_order() {
        let broker = MemoryBroker::new();
        broker.create_queue(&QueueOptions::new("orders")).await.unwrap();
        let transfer = facade(&broker);

        for body in ["one", "two", "three"] {
            assert_eq!(
                transfer
                    .send_message("orders", &OutgoingMessage::new(body), None)
                    .await,
                Outcome::Success
            );
        }

        let results = transfer
            .receive_messages(&ReceiveSource::queue("orders"), 3)
            .await
            .unwrap();
        let payloads: Vec<_> = results.iter().map(|r| r.payload.clone().unwrap()).collect();
        assert!(results.iter().all(|r| r.success));
        assert_eq!(payloads, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_receive_more_than_available() {
        let broker = MemoryBroker::new();
        broker.create_queue(&QueueOptions::new("orders")).await.unwrap();
        let transfer = facade(&broker);
        transfer
            .send_message("orders", &OutgoingMessage::new("only"), None)
            .await;

        let results = transfer
            .receive_messages(&ReceiveSource::queue("orders"), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_send() {
        let broker = MemoryBroker::new();
        broker.create_queue(&QueueOptions::new("orders")).await.unwrap();
        let transfer = facade(&broker);

        let at = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(
            transfer
                .send_message("orders", &OutgoingMessage::new("later"), Some(at))
                .await,
            Outcome::Success
        );
        assert!(transfer
            .receive_messages(&ReceiveSource::queue("orders"), 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_target() {
        let broker = MemoryBroker::new();
        let transfer = facade(&broker);

        assert_eq!(
            transfer
                .send_message("ghost", &OutgoingMessage::new("boo"), None)
                .await,
            Outcome::NotFound
        );
        assert_eq!(transfer.sender_count(), 0);

        let err = transfer
            .receive_messages(&ReceiveSource::queue("ghost"), 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(transfer.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_clients_are_pooled_and_evicted() {
        let broker = MemoryBroker::new();
        broker.create_topic(&TopicOptions::new("events")).await.unwrap();
        for name in ["audit", "billing"] {
            broker
                .create_subscription(&SubscriptionOptions::new("events", name))
                .await
                .unwrap();
        }
        broker.create_queue(&QueueOptions::new("orders")).await.unwrap();
        let transfer = facade(&broker);

        for _ in 0..3 {
            transfer
                .send_message("events", &OutgoingMessage::new("e"), None)
                .await;
        }
        transfer
            .send_message("orders", &OutgoingMessage::new("o"), None)
            .await;
        assert_eq!(transfer.sender_count(), 2);

        for name in ["audit", "billing"] {
            let results = transfer
                .receive_messages(&ReceiveSource::subscription("events", name), 5)
                .await
                .unwrap();
            assert_eq!(results.len(), 3);
        }
        transfer
            .receive_messages(&ReceiveSource::queue("orders"), 5)
            .await
            .unwrap();
        assert_eq!(transfer.receiver_count(), 3);

        transfer.evict_topic("events").await;
        assert_eq!(transfer.sender_count(), 1);
        assert_eq!(transfer.receiver_count(), 1);

        transfer.evict_queue("orders").await;
        assert_eq!(transfer.sender_count(), 0);
        assert_eq!(transfer.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_close_refuses_new_work() {
        let broker = MemoryBroker::new();
        broker.create_queue(&QueueOptions::new("orders")).await.unwrap();
        let transfer = facade(&broker);
        transfer
            .send_message("orders", &OutgoingMessage::new("x"), None)
            .await;

        transfer.close().await;
        assert_eq!(transfer.sender_count(), 0);
        assert!(matches!(
            transfer
                .send_message("orders", &OutgoingMessage::new("y"), None)
                .await,
            Outcome::TransportError(_)
        ));
        assert!(matches!(
            transfer
                .receive_messages(&ReceiveSource::queue("orders"), 1)
                .await,
            Err(BrokerError::Closed)
        ));
    }
}
