use super::*;
use bytes::Bytes;

fn short_wait() -> Duration {
    Duration::from_millis(50)
}

async fn broker_with_queue(name: &str) -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_queue(&QueueOptions::new(name)).await.unwrap();
    broker
}

fn remove_default_rule(broker: &MemoryBroker, topic: &str, subscription: &str) {
    let topic = broker.state.topics.get(topic).unwrap();
    let entity = topic.subscriptions.get(subscription).unwrap();
    entity.rules.write().retain(|r| r.name != DEFAULT_RULE_NAME);
}

#[tokio::test]
async fn test_create_and_exists() {
    let broker = MemoryBroker::new();
    assert!(!broker.queue_exists("orders").await.unwrap());

    broker.create_queue(&QueueOptions::new("orders")).await.unwrap();
    assert!(broker.queue_exists("orders").await.unwrap());
    assert!(!broker.topic_exists("orders").await.unwrap());

    let err = broker
        .create_queue(&QueueOptions::new("orders"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_queue_and_topic_share_namespace() {
    let broker = broker_with_queue("shared").await;
    let err = broker
        .create_topic(&TopicOptions::new("shared"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_subscription_requires_topic() {
    let broker = MemoryBroker::new();
    let err = broker
        .create_subscription(&SubscriptionOptions::new("events", "audit"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    broker
        .create_subscription(&SubscriptionOptions::new("events", "audit"))
        .await
        .unwrap();
    assert!(broker.subscription_exists("events", "audit").await.unwrap());
    assert!(!broker.subscription_exists("events", "billing").await.unwrap());
    assert!(!broker.subscription_exists("missing", "audit").await.unwrap());
}

#[tokio::test]
async fn test_delete_topic_removes_subscriptions() {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    broker
        .create_subscription(&SubscriptionOptions::new("events", "audit"))
        .await
        .unwrap();

    broker.delete_topic("events").await.unwrap();
    assert!(!broker.subscription_exists("events", "audit").await.unwrap());

    // Recreating the topic does not bring the subscription back
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    assert!(!broker.subscription_exists("events", "audit").await.unwrap());

    assert!(broker.delete_topic("nope").await.unwrap_err().is_not_found());
    assert!(broker
        .delete_subscription("events", "audit")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_list_is_sorted_and_paged() {
    let broker = MemoryBroker::new();
    for name in ["charlie", "alpha", "delta", "bravo"] {
        broker.create_queue(&QueueOptions::new(name)).await.unwrap();
    }

    assert_eq!(
        broker.list_queues(0, 100).await.unwrap(),
        vec!["alpha", "bravo", "charlie", "delta"]
    );
    assert_eq!(broker.list_queues(1, 2).await.unwrap(), vec!["bravo", "charlie"]);
    assert!(broker.list_queues(10, 2).await.unwrap().is_empty());
    assert!(broker.list_topics(0, 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_send_receive_complete() {
    let broker = broker_with_queue("orders").await;
    let sender = broker.create_sender("orders");
    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));

    sender.send(&OutgoingMessage::new("first")).await.unwrap();
    sender.send(&OutgoingMessage::new("second")).await.unwrap();

    let batch = receiver.receive(10, short_wait()).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].body, Bytes::from("first"));
    assert_eq!(batch[1].body, Bytes::from("second"));
    assert!(batch[0].sequence_number < batch[1].sequence_number);
    assert_eq!(batch[0].delivery_count, 1);

    for message in &batch {
        receiver.complete(message).await.unwrap();
    }
    assert!(receiver.receive(10, short_wait()).await.unwrap().is_empty());

    // A settled lock cannot be completed twice
    let err = receiver.complete(&batch[0]).await.unwrap_err();
    assert!(matches!(err, BrokerError::LockLost(_)));
}

#[tokio::test]
async fn test_receive_respects_max_messages() {
    let broker = broker_with_queue("orders").await;
    let sender = broker.create_sender("orders");
    for i in 0..5 {
        sender.send(&OutgoingMessage::new(format!("m{}", i))).await.unwrap();
    }

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    assert_eq!(receiver.receive(3, short_wait()).await.unwrap().len(), 3);
    assert_eq!(receiver.receive(3, short_wait()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_receive_waits_for_arrival() {
    let broker = broker_with_queue("orders").await;
    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));

    let sender = broker.create_sender("orders");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send(&OutgoingMessage::new("late")).await.unwrap();
    });

    let batch = receiver.receive(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, Bytes::from("late"));
}

#[tokio::test]
async fn test_message_id_is_kept_or_generated() {
    let broker = broker_with_queue("orders").await;
    let sender = broker.create_sender("orders");

    let mut message = OutgoingMessage::new("with id");
    message.message_id = Some("order-42".to_string());
    sender.send(&message).await.unwrap();
    sender.send(&OutgoingMessage::new("without id")).await.unwrap();

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    let batch = receiver.receive(2, short_wait()).await.unwrap();
    assert_eq!(batch[0].message_id, "order-42");
    assert!(!batch[1].message_id.is_empty());
}

#[tokio::test]
async fn test_scheduled_message_is_held_until_due() {
    let broker = broker_with_queue("orders").await;
    let sender = broker.create_sender("orders");
    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));

    let due = Utc::now() + chrono::Duration::milliseconds(300);
    sender
        .schedule(&OutgoingMessage::new("later"), due)
        .await
        .unwrap();

    assert!(receiver.receive(1, short_wait()).await.unwrap().is_empty());

    let batch = receiver.receive(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert!(Utc::now() >= due);
    assert_eq!(batch[0].enqueued_at, due);
}

#[tokio::test]
async fn test_schedule_in_the_past_is_immediate() {
    let broker = broker_with_queue("orders").await;
    let sender = broker.create_sender("orders");
    sender
        .schedule(
            &OutgoingMessage::new("now"),
            Utc::now() - chrono::Duration::seconds(10),
        )
        .await
        .unwrap();

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    assert_eq!(receiver.receive(1, short_wait()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_lock_redelivers() {
    let broker = MemoryBroker::new();
    let mut options = QueueOptions::new("orders");
    options.lock_duration = Duration::from_millis(100);
    broker.create_queue(&options).await.unwrap();

    broker
        .create_sender("orders")
        .send(&OutgoingMessage::new("retry me"))
        .await
        .unwrap();

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    let first = receiver.receive(1, short_wait()).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = receiver.complete(&first[0]).await.unwrap_err();
    assert!(matches!(err, BrokerError::LockLost(_)));

    let second = receiver.receive(1, short_wait()).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].sequence_number, first[0].sequence_number);
    assert_eq!(second[0].delivery_count, 2);
    receiver.complete(&second[0]).await.unwrap();
}

#[tokio::test]
async fn test_max_delivery_count_dead_letters() {
    let broker = MemoryBroker::new();
    let mut options = QueueOptions::new("orders");
    options.lock_duration = Duration::from_millis(50);
    options.max_delivery_count = 2;
    broker.create_queue(&options).await.unwrap();

    broker
        .create_sender("orders")
        .send(&OutgoingMessage::new("poison"))
        .await
        .unwrap();

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    for attempt in 1..=2 {
        let batch = receiver.receive(1, short_wait()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].delivery_count, attempt);
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    assert!(receiver.receive(1, short_wait()).await.unwrap().is_empty());
    let store = broker
        .state
        .store_for(&ReceiveSource::queue("orders"))
        .unwrap();
    assert_eq!(store.dead_letter_count(), 1);
    assert_eq!(store.message_count(), 0);
}

#[tokio::test]
async fn test_ready_order_with_scheduled_and_redelivered() {
    let broker = MemoryBroker::new();
    let mut options = QueueOptions::new("orders");
    options.lock_duration = Duration::from_millis(150);
    broker.create_queue(&options).await.unwrap();

    let sender = broker.create_sender("orders");
    let due = Utc::now() + chrono::Duration::milliseconds(60);
    sender
        .schedule(&OutgoingMessage::new("scheduled"), due)
        .await
        .unwrap();
    sender.send(&OutgoingMessage::new("first")).await.unwrap();
    sender.send(&OutgoingMessage::new("second")).await.unwrap();

    // Lock "first" and let it expire after "scheduled" comes due
    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    let locked = receiver.receive(1, short_wait()).await.unwrap();
    assert_eq!(locked[0].body, Bytes::from("first"));
    tokio::time::sleep(Duration::from_millis(250)).await;

    let batch = receiver.receive(3, short_wait()).await.unwrap();
    let bodies: Vec<Bytes> = batch.into_iter().map(|m| m.body).collect();
    assert_eq!(
        bodies,
        vec![
            Bytes::from("first"),
            Bytes::from("second"),
            Bytes::from("scheduled")
        ]
    );
}

#[tokio::test]
async fn test_quota_exceeded() {
    let broker = MemoryBroker::new();
    let mut options = QueueOptions::new("tiny");
    options.max_size_mb = 1;
    broker.create_queue(&options).await.unwrap();

    let sender = broker.create_sender("tiny");
    let big = vec![b'x'; 700 * 1024];
    sender.send(&OutgoingMessage::new(big.clone())).await.unwrap();
    let err = sender.send(&OutgoingMessage::new(big)).await.unwrap_err();
    assert!(matches!(err, BrokerError::QuotaExceeded(_)));
}

#[tokio::test]
async fn test_send_to_missing_entity() {
    let broker = MemoryBroker::new();
    let err = broker
        .create_sender("ghost")
        .send(&OutgoingMessage::new("boo"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = broker
        .create_receiver(&ReceiveSource::queue("ghost"))
        .receive(1, short_wait())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_receiver_sees_deleted_queue() {
    let broker = broker_with_queue("orders").await;
    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    assert!(receiver.receive(1, short_wait()).await.unwrap().is_empty());

    broker.delete_queue("orders").await.unwrap();
    assert!(receiver
        .receive(1, short_wait())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_closed_clients_reject_operations() {
    let broker = broker_with_queue("orders").await;
    let sender = broker.create_sender("orders");
    sender.close().await;
    assert!(matches!(
        sender.send(&OutgoingMessage::new("x")).await,
        Err(BrokerError::Closed)
    ));

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    receiver.close().await;
    assert!(matches!(
        receiver.receive(1, short_wait()).await,
        Err(BrokerError::Closed)
    ));
}

#[tokio::test]
async fn test_topic_fans_out_to_every_subscription() {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    for name in ["audit", "billing"] {
        broker
            .create_subscription(&SubscriptionOptions::new("events", name))
            .await
            .unwrap();
    }

    broker
        .create_sender("events")
        .send(&OutgoingMessage::new("created"))
        .await
        .unwrap();

    for name in ["audit", "billing"] {
        let receiver = broker.create_receiver(&ReceiveSource::subscription("events", name));
        let batch = receiver.receive(5, short_wait()).await.unwrap();
        assert_eq!(batch.len(), 1, "subscription {}", name);
        assert_eq!(batch[0].body, Bytes::from("created"));
    }
}

#[tokio::test]
async fn test_topic_without_subscriptions_accepts_send() {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    broker
        .create_sender("events")
        .send(&OutgoingMessage::new("dropped"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_default_rule_keeps_matching_alongside_filters() {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    broker
        .create_subscription(&SubscriptionOptions::new("events", "eu"))
        .await
        .unwrap();
    broker
        .create_rule("events", "eu", &RuleOptions::new("eu-only", "region = 'eu'"))
        .await
        .unwrap();

    broker
        .create_sender("events")
        .send(&OutgoingMessage::new("us order").with_property("region", "us"))
        .await
        .unwrap();

    let receiver = broker.create_receiver(&ReceiveSource::subscription("events", "eu"));
    assert_eq!(receiver.receive(5, short_wait()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_filter_rules_select_messages() {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    broker
        .create_subscription(&SubscriptionOptions::new("events", "eu"))
        .await
        .unwrap();
    broker
        .create_rule("events", "eu", &RuleOptions::new("eu-only", "region = 'eu'"))
        .await
        .unwrap();
    remove_default_rule(&broker, "events", "eu");

    let sender = broker.create_sender("events");
    sender
        .send(&OutgoingMessage::new("eu order").with_property("region", "eu"))
        .await
        .unwrap();
    sender
        .send(&OutgoingMessage::new("us order").with_property("region", "us"))
        .await
        .unwrap();

    let receiver = broker.create_receiver(&ReceiveSource::subscription("events", "eu"));
    let batch = receiver.receive(5, short_wait()).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, Bytes::from("eu order"));
}

#[tokio::test]
async fn test_create_rule_errors() {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicOptions::new("events")).await.unwrap();
    broker
        .create_subscription(&SubscriptionOptions::new("events", "audit"))
        .await
        .unwrap();

    let err = broker
        .create_rule("events", "audit", &RuleOptions::new("bad", "region = "))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidFilter(_)));

    let err = broker
        .create_rule("events", "audit", &RuleOptions::new(DEFAULT_RULE_NAME, "1=1"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::AlreadyExists(_)));

    let err = broker
        .create_rule("events", "ghost", &RuleOptions::new("r", "1=1"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_completed_messages_leave_the_store() {
    let broker = broker_with_queue("orders").await;
    broker
        .create_sender("orders")
        .send(&OutgoingMessage::new("once"))
        .await
        .unwrap();

    let store = broker
        .state
        .store_for(&ReceiveSource::queue("orders"))
        .unwrap();
    assert_eq!(store.message_count(), 1);

    let receiver = broker.create_receiver(&ReceiveSource::queue("orders"));
    let batch = receiver.receive(1, short_wait()).await.unwrap();
    assert_eq!(store.message_count(), 1);
    receiver.complete(&batch[0]).await.unwrap();
    assert_eq!(store.message_count(), 0);
}
