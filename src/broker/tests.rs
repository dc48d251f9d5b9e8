use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::Broker;
use super::subscriber::Subscriber;
use super::topic::{Topic, TopicRegistry, validate_topic_name};
use crate::utils::error::{BrokerError, DeliveryError};

fn channel_subscriber(
    broker: &Broker<Value>,
    topic: &str,
) -> (
    super::SubscriberHandle<Value>,
    mpsc::UnboundedReceiver<Value>,
) {
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let handle = broker
        .subscribe(topic, move |event| {
            tx.send(event).map_err(|_| DeliveryError::SinkClosed)
        })
        .unwrap();
    (handle, rx)
}

fn noop_subscriber(topic: &str) -> Arc<Subscriber<Value>> {
    Arc::new(Subscriber::new(Arc::from(topic), Box::new(|_| Ok(()))))
}

#[test]
fn test_topic_new() {
    let topic = Topic::<Value>::new(Arc::from("test_topic"));
    assert_eq!(&*topic.name, "test_topic");
    assert!(topic.is_empty());
}

#[test]
fn test_topic_subscribe_dedupes_same_handle() {
    let mut topic = Topic::new(Arc::from("test_topic"));
    let subscriber = noop_subscriber("test_topic");

    assert!(topic.subscribe(subscriber.clone()));
    assert!(!topic.subscribe(subscriber.clone()));
    assert_eq!(topic.len(), 1);
    assert!(topic.contains(&subscriber.id()));
}

#[test]
fn test_topic_unsubscribe() {
    let mut topic = Topic::new(Arc::from("test_topic"));
    let subscriber = noop_subscriber("test_topic");
    topic.subscribe(subscriber.clone());

    assert!(topic.unsubscribe(&subscriber.id()));
    assert!(!topic.unsubscribe(&subscriber.id()));
    assert!(topic.is_empty());
}

#[test]
fn test_registry_drops_topic_with_last_subscriber() {
    let registry = TopicRegistry::default();
    let first = noop_subscriber("TODO_ADDED");
    let second = noop_subscriber("TODO_ADDED");
    registry.subscribe(first.clone()).unwrap();
    registry.subscribe(second.clone()).unwrap();
    assert_eq!(registry.subscriber_count("TODO_ADDED"), 2);

    registry.unsubscribe("TODO_ADDED", &first.id());
    assert!(registry.contains_topic("TODO_ADDED"));

    registry.unsubscribe("TODO_ADDED", &second.id());
    assert!(!registry.contains_topic("TODO_ADDED"));
    assert_eq!(registry.topic_count(), 0);
}

#[test]
fn test_registry_unsubscribe_unknown_is_noop() {
    let registry = TopicRegistry::<Value>::default();
    let stray = noop_subscriber("nowhere");
    assert!(!registry.unsubscribe("nowhere", &stray.id()));
    assert_eq!(registry.topic_count(), 0);
}

#[test]
fn test_validate_topic_name() {
    assert!(validate_topic_name("TODO_ADDED").is_ok());
    assert!(validate_topic_name("todo.v1:added-2").is_ok());
    assert_eq!(
        validate_topic_name(""),
        Err(BrokerError::InvalidTopic(String::new()))
    );
    assert!(validate_topic_name("has space").is_err());
    assert!(validate_topic_name("todo/*").is_err());
    assert!(validate_topic_name(&"x".repeat(257)).is_err());
}

#[test]
fn test_broker_new() {
    let broker = Broker::<Value>::default();
    assert_eq!(broker.topic_count(), 0);
    assert_eq!(broker.stats(), super::BrokerStats::default());
}

#[test]
fn test_broker_subscribe_and_unsubscribe() {
    let broker = Broker::<Value>::new();
    let (handle, _rx) = channel_subscriber(&broker, "test_topic");

    assert!(broker.has_topic("test_topic"));
    assert_eq!(broker.subscriber_count("test_topic"), 1);
    assert!(handle.is_active());

    assert!(broker.unsubscribe(&handle));
    assert!(!handle.is_active());
    assert!(!broker.has_topic("test_topic"));
}

#[test]
fn test_broker_unsubscribe_twice_is_noop() {
    let broker = Broker::<Value>::new();
    let (handle, _rx) = channel_subscriber(&broker, "test_topic");

    assert!(broker.unsubscribe(&handle));
    assert!(!broker.unsubscribe(&handle));
    assert_eq!(broker.stats().unregistrations, 1);
}

#[test]
fn test_broker_rejects_invalid_topic() {
    let broker = Broker::<Value>::new();
    let err = broker.subscribe("bad topic", |_| Ok(())).unwrap_err();
    assert_eq!(err, BrokerError::InvalidTopic("bad topic".into()));
    assert_eq!(broker.topic_count(), 0);
}

#[test]
fn test_broker_subscriber_limit() {
    let broker = Broker::<Value>::with_subscriber_limit(1);
    let _first = broker.subscribe("limited", |_| Ok(())).unwrap();
    let err = broker.subscribe("limited", |_| Ok(())).unwrap_err();
    assert_eq!(
        err,
        BrokerError::TopicFull {
            topic: "limited".into(),
            limit: 1
        }
    );
    assert_eq!(broker.subscriber_count("limited"), 1);
}

#[test]
fn test_broker_publish() {
    let broker = Broker::new();
    let (_handle, mut rx) = channel_subscriber(&broker, "test_topic");

    let delivered = broker.publish("test_topic", json!({ "id": 1 }));

    assert_eq!(delivered, 1);
    assert_eq!(rx.try_recv().unwrap(), json!({ "id": 1 }));
}

#[test]
fn test_broker_fans_out_to_every_subscriber() {
    let broker = Broker::new();
    let mut receivers: Vec<_> = (0..3)
        .map(|_| channel_subscriber(&broker, "multi"))
        .collect();

    assert_eq!(broker.publish("multi", json!("d")), 3);
    for (_, rx) in receivers.iter_mut() {
        assert_eq!(rx.try_recv().unwrap(), json!("d"));
    }
}

#[test]
fn test_publish_to_nonexistent_topic() {
    let broker = Broker::<Value>::new();
    assert_eq!(broker.publish("nonexistent_topic", json!("hello")), 0);
    assert!(!broker.has_topic("nonexistent_topic"));
    assert_eq!(broker.stats().publishes, 1);
}

#[test]
fn test_no_delivery_after_unsubscribe() {
    let broker = Broker::new();
    let (handle, mut rx) = channel_subscriber(&broker, "added");

    broker.publish("added", json!(1));
    broker.unsubscribe(&handle);
    broker.publish("added", json!(2));

    assert_eq!(rx.try_recv().unwrap(), json!(1));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_per_subscriber_order_is_preserved() {
    let broker = Broker::new();
    let (_a, mut rx_a) = channel_subscriber(&broker, "ordered");
    let (_b, mut rx_b) = channel_subscriber(&broker, "ordered");

    for i in 0..100 {
        broker.publish("ordered", json!(i));
    }

    for rx in [&mut rx_a, &mut rx_b] {
        let received: Vec<Value> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(received, (0..100).map(|i| json!(i)).collect::<Vec<_>>());
    }
}

#[test]
fn test_publish_to_client_with_closed_channel() {
    let broker = Broker::new();
    let (_dead, dead_rx) = channel_subscriber(&broker, "test_topic");
    let (_live, mut live_rx) = channel_subscriber(&broker, "test_topic");

    // Drop the receiver to close the channel
    drop(dead_rx);

    assert_eq!(broker.publish("test_topic", json!("hello")), 1);
    assert_eq!(live_rx.try_recv().unwrap(), json!("hello"));

    let stats = broker.stats();
    assert_eq!(stats.delivery_failures, 1);
    assert_eq!(broker.subscriber_count("test_topic"), 1);
}

#[test]
fn test_panicking_callback_is_isolated() {
    let broker = Broker::new();
    let panicking = broker
        .subscribe("boom", |_: Value| -> Result<(), DeliveryError> {
            panic!("subscriber blew up")
        })
        .unwrap();
    let (_live, mut live_rx) = channel_subscriber(&broker, "boom");

    assert_eq!(broker.publish("boom", json!(1)), 1);
    assert_eq!(live_rx.try_recv().unwrap(), json!(1));
    assert!(!panicking.is_active());
    assert_eq!(broker.subscriber_count("boom"), 1);
}

#[test]
fn test_no_delivery_after_unsubscribe_under_concurrent_publish() {
    let broker = Arc::new(Broker::new());
    let unsubscribed = Arc::new(AtomicBool::new(false));
    let violations = Arc::new(AtomicUsize::new(0));

    let handle = {
        let unsubscribed = unsubscribed.clone();
        let violations = violations.clone();
        broker
            .subscribe("race", move |_: Value| {
                if unsubscribed.load(Ordering::SeqCst) {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .unwrap()
    };
    // Keeps the topic alive after `handle` leaves.
    let _anchor = broker.subscribe("race", |_: Value| Ok(())).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let publishers: Vec<_> = (0..4)
        .map(|_| {
            let broker = broker.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    broker.publish("race", json!(null));
                }
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(20));
    broker.unsubscribe(&handle);
    unsubscribed.store(true, Ordering::SeqCst);
    thread::sleep(std::time::Duration::from_millis(20));

    stop.store(true, Ordering::SeqCst);
    for p in publishers {
        p.join().unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_subscribe_unsubscribe_leaves_no_empty_topics() {
    let broker = Arc::new(Broker::<Value>::new());
    let seen = Arc::new(Mutex::new(0usize));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let broker = broker.clone();
            let seen = seen.clone();
            thread::spawn(move || {
                let topic = format!("topic-{}", i % 2);
                for _ in 0..200 {
                    let seen = seen.clone();
                    let handle = broker
                        .subscribe(&topic, move |_| {
                            *seen.lock().unwrap() += 1;
                            Ok(())
                        })
                        .unwrap();
                    broker.publish(&topic, json!(i));
                    broker.unsubscribe(&handle);
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(broker.topic_count(), 0);
    let stats = broker.stats();
    assert_eq!(stats.registrations, 1600);
    assert_eq!(stats.unregistrations, 1600);
    assert!(*seen.lock().unwrap() >= 1600);
}
