use crate::helpers::{
    header, queue, registry, Event, FakeChannel, NewsletterSent, OrderPlaced, Plan,
    UserRegistered, EXCHANGE, QUEUE,
};
use carrot_gates::amqp::configuration::QueueSettings;
use carrot_gates::amqp::convenience::set_header;
use carrot_gates::amqp::topology::ExchangeDeclaration;
use carrot_gates::amqp::types::AMQPValue;
use carrot_gates::amqp::BasicProperties;
use carrot_gates::consumers::{
    AccumulativeConsumer, BatchConsumerFn, ConsumerFn, Consumers, Job, SingleConsumer,
};
use carrot_gates::gates::{GateError, MessageType};
use carrot_gates::queue::{Queue, QueueBuilder, QueueError};
use chrono::{SubsecRound, Utc};
use fake::{Fake, Faker};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(serde::Serialize, serde::Deserialize)]
struct NeverRegistered;

/// Consumers for `OrderPlaced` that ack and record every order id.
fn recording_consumers() -> (Consumers, Arc<Mutex<Vec<u64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumers = Consumers::new().with::<OrderPlaced, _>(SingleConsumer::new(ConsumerFn::new({
        let seen = Arc::clone(&seen);
        move |job: Job<OrderPlaced>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(job.message().order_id);
                Ok::<_, anyhow::Error>(())
            }
        }
    })));
    (consumers, seen)
}

#[tokio::test]
async fn produce_publishes_persistent_json_with_the_routing_key_of_the_gate() {
    // Arrange
    let channel = FakeChannel::default();
    let queue = queue(&channel).await;

    // Act
    queue.produce(&OrderPlaced { order_id: 42 }).await.unwrap();

    // Assert
    let published = channel.published();
    assert_eq!(1, published.len());
    let envelope = &published[0];
    assert_eq!(EXCHANGE, envelope.exchange_name);
    assert_eq!("order.placed", envelope.routing_key);
    assert!(envelope.is_persistent());
    assert_eq!(
        Some("application/json"),
        envelope.properties.content_type().as_ref().map(|c| c.as_str())
    );
    assert!(envelope.properties.message_id().is_some());
    assert_eq!(
        serde_json::json!({ "order_id": 42 }),
        serde_json::from_slice::<serde_json::Value>(&envelope.payload).unwrap()
    );
}

#[tokio::test]
async fn the_main_exchange_is_declared_once_for_producing() {
    // Arrange
    let channel = FakeChannel::default();
    let queue = queue(&channel).await;

    // Act
    queue.produce(&OrderPlaced { order_id: 1 }).await.unwrap();
    queue.produce(&OrderPlaced { order_id: 2 }).await.unwrap();

    // Assert
    assert_eq!(vec![ExchangeDeclaration::topic(EXCHANGE)], channel.exchanges());
    assert_eq!(2, channel.published().len());
}

#[tokio::test]
async fn producing_an_unregistered_type_fails() {
    // Arrange
    let channel = FakeChannel::default();
    let queue = queue(&channel).await;

    // Act
    let outcome = queue.produce(&NeverRegistered).await;

    // Assert
    match outcome {
        Err(QueueError::Gate(GateError::UnknownMessageType(message_type))) => {
            assert_eq!(MessageType::of::<NeverRegistered>(), message_type)
        }
        other => panic!("Expected an unknown message type error, got {other:?}"),
    }
    assert!(channel.published().is_empty());
}

#[tokio::test]
async fn produced_messages_are_consumed_unchanged() {
    // Arrange
    let producer_channel = FakeChannel::default();
    let producer = queue(&producer_channel).await;
    let message = UserRegistered {
        email: Faker.fake(),
        registered_at: Utc::now().trunc_subsecs(3),
        plan: Plan::Premium,
    };
    producer.produce(&message).await.unwrap();
    let envelope = producer_channel.published().remove(0);

    let (channel, deliveries) = FakeChannel::consuming();
    let consumer = queue(&channel).await;
    let received = Arc::new(Mutex::new(None));
    let consumers = Consumers::new().with::<UserRegistered, _>(SingleConsumer::new(
        ConsumerFn::new({
            let received = Arc::clone(&received);
            move |job: Job<UserRegistered>| {
                let received = Arc::clone(&received);
                async move {
                    *received.lock().unwrap() = Some(job.message().clone());
                    Ok::<_, anyhow::Error>(())
                }
            }
        }),
    ));

    // Act
    deliveries
        .send(channel.delivery(
            1,
            &envelope.routing_key,
            envelope.payload.clone(),
            envelope.properties.clone(),
        ))
        .unwrap();
    drop(deliveries);
    consumer.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert_eq!(Some(message), received.lock().unwrap().clone());
    assert_eq!(vec![1], channel.acked());
    let document: serde_json::Value = serde_json::from_slice(&envelope.payload).unwrap();
    assert_eq!("premium", document["plan"]);
    assert!(document["registered_at"].is_string());
}

#[tokio::test]
async fn consume_declares_the_queue_and_binds_the_consumed_types_only() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = Queue::builder(EXCHANGE, registry())
        .prefetch_count(17)
        .with_channels(channel.clone(), channel.clone(), channel.clone())
        .await
        .unwrap();
    let (consumers, _) = recording_consumers();
    drop(deliveries);

    // Act
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert_eq!(Some(17), channel.qos());
    assert_eq!(vec![ExchangeDeclaration::topic(EXCHANGE)], channel.exchanges());
    assert_eq!(vec![QUEUE.to_owned()], channel.queues());
    assert_eq!(
        vec![(
            QUEUE.to_owned(),
            EXCHANGE.to_owned(),
            "order.placed".to_owned()
        )],
        channel.queue_bindings()
    );
}

#[tokio::test]
async fn every_delivery_is_dispatched_to_its_consumer() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let (consumers, seen) = recording_consumers();

    // Act
    for order_id in 1..=5u64 {
        let body = serde_json::to_vec(&OrderPlaced { order_id }).unwrap();
        deliveries
            .send(channel.delivery(order_id, "order.placed", body, BasicProperties::default()))
            .unwrap();
    }
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(vec![1, 2, 3, 4, 5], seen);
    let mut acked = channel.acked();
    acked.sort_unstable();
    assert_eq!(vec![1, 2, 3, 4, 5], acked);
}

#[tokio::test]
async fn a_slow_consumer_does_not_hold_back_the_next_deliveries() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let second_order_seen = Arc::new(Notify::new());
    let consumers = Consumers::new().with::<OrderPlaced, _>(SingleConsumer::new(ConsumerFn::new({
        let second_order_seen = Arc::clone(&second_order_seen);
        move |job: Job<OrderPlaced>| {
            let second_order_seen = Arc::clone(&second_order_seen);
            async move {
                if job.message().order_id == 1 {
                    second_order_seen.notified().await;
                } else {
                    second_order_seen.notify_one();
                }
                Ok::<_, anyhow::Error>(())
            }
        }
    })));

    // Act - the first order can only complete once the second one has been dispatched
    for order_id in 1..=2u64 {
        let body = serde_json::to_vec(&OrderPlaced { order_id }).unwrap();
        deliveries
            .send(channel.delivery(order_id, "order.placed", body, BasicProperties::default()))
            .unwrap();
    }
    drop(deliveries);
    tokio::time::timeout(Duration::from_secs(5), queue.consume(QUEUE, consumers))
        .await
        .expect("Deliveries were dispatched one after the other")
        .unwrap();

    // Assert
    let mut acked = channel.acked();
    acked.sort_unstable();
    assert_eq!(vec![1, 2], acked);
}

#[tokio::test(start_paused = true)]
async fn consume_waits_for_accumulated_batches_to_be_flushed() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let batches = Arc::new(Mutex::new(Vec::new()));
    let consumer = BatchConsumerFn::new({
        let batches = Arc::clone(&batches);
        move |jobs: Vec<Job<OrderPlaced>>| {
            let batches = Arc::clone(&batches);
            async move {
                let mut order_ids: Vec<u64> = jobs.iter().map(|j| j.message().order_id).collect();
                order_ids.sort_unstable();
                batches.lock().unwrap().push(order_ids);
                Ok::<_, anyhow::Error>(())
            }
        }
    });
    let consumers = Consumers::new().with::<OrderPlaced, _>(
        AccumulativeConsumer::new(consumer)
            .with_batch_size(10)
            .with_timeout(Duration::from_millis(200)),
    );

    // Act - fewer deliveries than a batch, the stream ends right away
    for order_id in 1..=2u64 {
        let body = serde_json::to_vec(&OrderPlaced { order_id }).unwrap();
        deliveries
            .send(channel.delivery(order_id, "order.placed", body, BasicProperties::default()))
            .unwrap();
    }
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert - the batch is out by the time consume returns
    assert_eq!(vec![vec![1, 2]], *batches.lock().unwrap());
    let mut acked = channel.acked();
    acked.sort_unstable();
    assert_eq!(vec![1, 2], acked);
}

#[tokio::test]
async fn deliveries_with_an_unknown_routing_key_are_acked_and_dropped() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let (consumers, seen) = recording_consumers();

    // Act
    deliveries
        .send(channel.delivery(
            1,
            "nobody.cares",
            r#"{"order_id": 1}"#,
            BasicProperties::default(),
        ))
        .unwrap();
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert_eq!(vec![Event::Acked(1)], channel.events());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn deliveries_of_a_type_without_consumer_are_acked_and_dropped() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let (consumers, _) = recording_consumers();
    let body = serde_json::to_vec(&NewsletterSent {
        subject: Faker.fake(),
    })
    .unwrap();

    // Act
    deliveries
        .send(channel.delivery(1, "newsletter.sent", body, BasicProperties::default()))
        .unwrap();
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert_eq!(vec![Event::Acked(1)], channel.events());
}

#[tokio::test]
async fn undecodable_deliveries_are_requeued_once() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let (consumers, seen) = recording_consumers();

    // Act
    deliveries
        .send(channel.delivery(
            1,
            "order.placed",
            r#"{"order_id": "not a number"}"#,
            BasicProperties::default(),
        ))
        .unwrap();
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert!(seen.lock().unwrap().is_empty());
    assert!(channel.acked().is_empty());
    assert_eq!(vec![1], channel.rejected());
    let published = channel.published();
    assert_eq!(1, published.len());
    assert_eq!(format!("{EXCHANGE}_delayed"), published[0].exchange_name);
    assert_eq!("order.placed", published[0].routing_key);
}

#[tokio::test]
async fn failed_jobs_are_requeued_with_one_more_attempt() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let consumers = Consumers::new().with::<OrderPlaced, _>(ConsumerFn::new(
        |_: Job<OrderPlaced>| async { Err::<(), _>(anyhow::anyhow!("Database is down")) },
    ));
    let properties = set_header(
        BasicProperties::default(),
        "x-attempts",
        AMQPValue::LongLongInt(3),
    );
    let body = serde_json::to_vec(&OrderPlaced { order_id: 8 }).unwrap();

    // Act
    deliveries
        .send(channel.delivery(4, "order.placed", body.clone(), properties))
        .unwrap();
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert - republished first, then rejected
    let events = channel.events();
    assert_eq!(2, events.len());
    let Event::Published(envelope) = &events[0] else {
        panic!("Expected a publish first, got {:?}", events[0]);
    };
    assert_eq!(Event::Rejected(4), events[1]);
    assert_eq!(body, envelope.payload);
    assert_eq!(Some(4), header(envelope, "x-attempts"));
    let delay = header(envelope, "x-delay").unwrap();
    assert!((1000..=64_000).contains(&delay), "Unexpected delay {delay}");
}

#[tokio::test]
async fn the_delayed_exchange_is_declared_and_bound_to_the_main_exchange() {
    // Arrange
    let channel = FakeChannel::default();
    let queue = queue(&channel).await;
    let first = channel.delivery(1, "order.placed", "{}", BasicProperties::default());
    let second = channel.delivery(2, "order.placed", "{}", BasicProperties::default());

    // Act
    queue.requeue_later(&first, 5000).await.unwrap();
    queue.requeue_later(&second, 5000).await.unwrap();

    // Assert
    assert_eq!(
        vec![
            ExchangeDeclaration::topic(EXCHANGE),
            ExchangeDeclaration::delayed(EXCHANGE)
        ],
        channel.exchanges()
    );
    assert_eq!(
        vec![(
            EXCHANGE.to_owned(),
            format!("{EXCHANGE}_delayed"),
            String::new()
        )],
        channel.exchange_bindings()
    );
    let published = channel.published();
    assert_eq!(Some(5000), header(&published[0], "x-delay"));
    assert_eq!(Some(2), header(&published[0], "x-attempts"));
}

#[tokio::test]
async fn a_failed_republish_leaves_the_delivery_pending() {
    // Arrange
    let channel = FakeChannel::default();
    let queue = queue(&channel).await;
    let delivery = channel.delivery(1, "order.placed", "{}", BasicProperties::default());
    channel.fail_publish();

    // Act
    let outcome = queue.requeue(&delivery).await;

    // Assert
    assert!(matches!(outcome, Err(QueueError::Publish(_))));
    assert!(!delivery.is_processed());
    assert!(channel.events().is_empty());
}

#[tokio::test]
async fn a_job_finalized_before_failing_is_not_requeued() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let consumers = Consumers::new().with::<OrderPlaced, _>(ConsumerFn::new(
        |job: Job<OrderPlaced>| async move {
            job.ack().await.unwrap();
            Err::<(), _>(anyhow::anyhow!("Post-processing failed"))
        },
    ));
    let body = serde_json::to_vec(&OrderPlaced { order_id: 1 }).unwrap();

    // Act
    deliveries
        .send(channel.delivery(1, "order.placed", body, BasicProperties::default()))
        .unwrap();
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert_eq!(vec![Event::Acked(1)], channel.events());
}

#[tokio::test]
async fn a_panicking_consumer_gets_its_job_requeued() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let consumers = Consumers::new().with::<OrderPlaced, _>(ConsumerFn::new(
        |job: Job<OrderPlaced>| async move {
            if job.message().order_id == 1 {
                panic!("Unexpected order");
            }
            job.ack().await?;
            Ok::<_, anyhow::Error>(())
        },
    ));

    // Act
    for order_id in 1..=2u64 {
        let body = serde_json::to_vec(&OrderPlaced { order_id }).unwrap();
        deliveries
            .send(channel.delivery(order_id, "order.placed", body, BasicProperties::default()))
            .unwrap();
    }
    drop(deliveries);
    queue.consume(QUEUE, consumers).await.unwrap();

    // Assert
    assert_eq!(vec![2], channel.acked());
    assert_eq!(vec![1], channel.rejected());
    assert_eq!(1, channel.published().len());
}

#[tokio::test]
async fn consume_until_stops_on_shutdown() {
    // Arrange
    let (channel, deliveries) = FakeChannel::consuming();
    let queue = queue(&channel).await;
    let (consumers, _) = recording_consumers();

    // Act - the delivery stream stays open
    let outcome = queue
        .consume_until(QUEUE, consumers, std::future::ready(()))
        .await;

    // Assert
    assert!(outcome.is_ok());
    drop(deliveries);
}

#[tokio::test]
async fn queues_can_be_built_from_settings() {
    // Arrange
    let channel = FakeChannel::default();
    let settings: QueueSettings = serde_json::from_value(serde_json::json!({
        "exchange": "billing",
        "prefetch_count": "12"
    }))
    .unwrap();

    // Act
    let queue = QueueBuilder::from_settings(&settings, registry())
        .with_channels(channel.clone(), channel.clone(), channel.clone())
        .await
        .unwrap();
    queue.produce(&OrderPlaced { order_id: 1 }).await.unwrap();

    // Assert
    assert_eq!("billing", queue.exchange());
    assert_eq!(Some(12), channel.qos());
    assert_eq!("billing", channel.published()[0].exchange_name);
}
