use super::error::{BrokerError, ProtocolError, SessionError};
use super::logging;
use crate::transport::message::OperationId;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn test_protocol_error_fatality() {
    assert!(ProtocolError::UnknownKind("subscribe".into()).is_fatal());
    assert!(ProtocolError::Malformed("not json".into()).is_fatal());
    assert!(ProtocolError::HandshakeRequired("start".into()).is_fatal());
    assert!(!ProtocolError::DuplicateOperation(OperationId::from("1")).is_fatal());
    assert!(!ProtocolError::PublishDisabled.is_fatal());
    assert!(!ProtocolError::InvalidOperationId("-1".into()).is_fatal());
}

#[test]
fn test_session_error_wraps_broker_error() {
    let err: SessionError = BrokerError::TopicFull {
        topic: "TODO_ADDED".into(),
        limit: 2,
    }
    .into();
    assert_eq!(
        err.to_string(),
        "topic 'TODO_ADDED' reached its subscriber limit of 2"
    );
}

#[test]
fn unknown_levels_fall_back_to_info() {
    assert_eq!(logging::normalize_level("WARNING"), "warn");
    assert_eq!(logging::normalize_level("Debug"), "debug");
    assert_eq!(logging::normalize_level("verbose"), "info");
}
