use super::clock::{Clock, ManualClock};
use super::error::{BrokerError, DeliveryError, DeliveryFailure, QueueError};
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level(" trace "), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("nonsense"), tracing::Level::INFO);
}

#[test]
fn manual_clock_moves_only_when_told() {
    let clock = ManualClock::new(100);
    assert_eq!(clock.now_millis(), 100);
    assert_eq!(clock.advance(50), 150);
    clock.set(10);
    assert_eq!(clock.now_millis(), 10);
}

#[test]
fn delivery_error_lists_failed_subscribers() {
    let err = BrokerError::Delivery {
        failures: vec![
            DeliveryFailure {
                id: "a".to_string(),
                error: DeliveryError::new("boom"),
            },
            DeliveryFailure {
                id: "c".to_string(),
                error: DeliveryError::new("gone"),
            },
        ],
    };
    assert!(err.is_message_send());
    assert_eq!(err.failed_ids(), vec!["a", "c"]);
    assert_eq!(err.to_string(), "delivery failed for a: boom, c: gone");
}

#[test]
fn error_kinds_are_grouped() {
    assert!(!BrokerError::Connect { id: "x".into() }.is_message_send());
    assert!(BrokerError::NotConnected { id: "x".into() }.is_message_send());
    assert!(!BrokerError::Unsupported { operation: "send_async" }.is_message_send());
    assert_eq!(BrokerError::from(QueueError::Closed), BrokerError::Closed);
}
