use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{SelectorResolver, Session, SessionState, TopicMap};
use crate::broker::Broker;
use crate::client::Client;
use crate::config::Settings;
use crate::transport::message::{OperationId, ServerMessage};
use crate::utils::error::{BrokerError, SessionError};

fn outbox() -> (Client, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Client::new(tx), rx)
}

fn identity(selector: &str) -> Option<String> {
    Some(selector.to_string())
}

#[test]
fn test_topic_map_resolves_default_selectors() {
    let map = TopicMap::from_settings(&Settings::default());
    assert_eq!(map.resolve("todoAdded").as_deref(), Some("TODO_ADDED"));
    assert_eq!(map.resolve("todoRemoved").as_deref(), Some("TODO_REMOVED"));
    assert_eq!(map.resolve("added"), None);
}

#[test]
fn test_topic_map_passthrough_only_for_valid_names() {
    let map = TopicMap::new(HashMap::new()).with_passthrough(true);
    assert_eq!(map.resolve("added").as_deref(), Some("added"));
    assert_eq!(map.resolve("not a topic"), None);
}

#[test]
fn test_session_activate_and_receive() {
    let broker = Broker::new();
    let (client, mut rx) = outbox();
    let mut session = Session::new(OperationId::from("1"), "added");

    session.activate(&broker, &identity, &client).unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.topic(), Some("added"));
    assert!(session.is_live());

    broker.publish("added", json!({ "id": 1 }));
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerMessage::Next {
            id: OperationId::from("1"),
            payload: json!({ "id": 1 }),
        }
    );
}

#[test]
fn test_session_unknown_selector_never_registers() {
    let broker = Broker::<Value>::new();
    let (client, _rx) = outbox();
    let map = TopicMap::from_settings(&Settings::default());
    let mut session = Session::new(OperationId::from("1"), "todoExploded");

    let err = session.activate(&broker, &map, &client).unwrap_err();

    assert_eq!(err, SessionError::UnknownSelector("todoExploded".into()));
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(broker.stats().registrations, 0);
    assert_eq!(broker.topic_count(), 0);
}

#[test]
fn test_session_invalid_resolved_topic() {
    let broker = Broker::<Value>::new();
    let (client, _rx) = outbox();
    let bad = |_: &str| Some("spaces are not allowed".to_string());
    let mut session = Session::new(OperationId::from("7"), "anything");

    let err = session.activate(&broker, &bad, &client).unwrap_err();

    assert!(matches!(err, SessionError::InvalidTopic { .. }));
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(broker.topic_count(), 0);
}

#[test]
fn test_session_registration_failure() {
    let broker = Broker::<Value>::with_subscriber_limit(1);
    let _taken = broker.subscribe("added", |_| Ok(())).unwrap();
    let (client, _rx) = outbox();
    let mut session = Session::new(OperationId::from("2"), "added");

    let err = session.activate(&broker, &identity, &client).unwrap_err();

    assert_eq!(
        err,
        SessionError::Registration(BrokerError::TopicFull {
            topic: "added".into(),
            limit: 1
        })
    );
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test]
fn test_session_stop_emits_complete_after_last_next() {
    let broker = Broker::new();
    let (client, mut rx) = outbox();
    let mut session = Session::new(OperationId::from("1"), "added");
    session.activate(&broker, &identity, &client).unwrap();

    broker.publish("added", json!(1));
    assert!(session.stop(&broker, &client));
    broker.publish("added", json!(2));

    assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Next { .. }));
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerMessage::Complete {
            id: OperationId::from("1")
        }
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(!broker.has_topic("added"));
}

#[test]
fn test_session_stop_twice_is_noop() {
    let broker = Broker::<Value>::new();
    let (client, mut rx) = outbox();
    let mut session = Session::new(OperationId::from("1"), "added");
    session.activate(&broker, &identity, &client).unwrap();

    assert!(session.stop(&broker, &client));
    assert!(!session.stop(&broker, &client));

    assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Complete { .. }));
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.stats().unregistrations, 1);
}

#[test]
fn test_session_terminate_emits_nothing() {
    let broker = Broker::<Value>::new();
    let (client, mut rx) = outbox();
    let mut pending = Session::new(OperationId::from("p"), "added");
    let mut active = Session::new(OperationId::from("a"), "added");
    active.activate(&broker, &identity, &client).unwrap();

    assert!(pending.terminate(&broker));
    assert!(active.terminate(&broker));
    assert!(!active.terminate(&broker));

    assert_eq!(pending.state(), SessionState::Terminated);
    assert_eq!(active.state(), SessionState::Terminated);
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.topic_count(), 0);
}

#[test]
fn test_session_not_live_after_delivery_failure() {
    let broker = Broker::new();
    let (client, rx) = outbox();
    let mut session = Session::new(OperationId::from("1"), "added");
    session.activate(&broker, &identity, &client).unwrap();

    drop(rx);
    broker.publish("added", json!(1));

    assert_eq!(session.state(), SessionState::Active);
    assert!(!session.is_live());
    assert!(!broker.has_topic("added"));
}

#[test]
fn test_session_stop_with_closed_outbox_still_unregisters() {
    let broker = Broker::<Value>::new();
    let (client, rx) = outbox();
    let mut session = Session::new(OperationId::from("1"), "added");
    session.activate(&broker, &identity, &client).unwrap();

    drop(rx);
    assert!(session.stop(&broker, &client));
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(!broker.has_topic("added"));
}
