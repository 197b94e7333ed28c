use chrono::Utc;
use fuseguard::error::ErrorKind;
use fuseguard::events::{BalancerEvent, ChangeReason, EventBus, FaultEvent, LimitChangeEvent};
use fuseguard::types::Phase;
use tokio_stream::StreamExt;

fn limit_event(new_limit: u32) -> BalancerEvent {
    BalancerEvent::LimitChanged(LimitChangeEvent::new(
        Some(Phase::L1),
        16,
        new_limit,
        ChangeReason::RiskLimit,
        Utc::now(),
    ))
}

#[tokio::test]
async fn every_subscriber_sees_every_event() {
    let bus = EventBus::new(8);
    let mut first = bus.subscribe();
    let mut second = bus.stream();
    assert_eq!(bus.receiver_count(), 2);

    bus.emit(limit_event(12));
    bus.emit(BalancerEvent::Fault(FaultEvent {
        kind: ErrorKind::MeterUnavailable,
        phase: Some(Phase::L2),
        message: "no reading".to_string(),
        timestamp: Utc::now(),
    }));

    let a = first.recv().await.unwrap();
    assert_eq!(a.as_limit_change().unwrap().new_limit, 12);
    let b = first.recv().await.unwrap();
    assert_eq!(b.as_fault().unwrap().kind, ErrorKind::MeterUnavailable);

    let c = second.next().await.unwrap().unwrap();
    assert_eq!(c, a);
}

#[test]
fn emitting_without_subscribers_is_fine() {
    let bus = EventBus::default();
    bus.emit(limit_event(10));
    assert_eq!(bus.receiver_count(), 0);
}

#[tokio::test]
async fn slow_subscriber_is_told_it_lagged() {
    let bus = EventBus::new(2);
    let mut stream = bus.stream();
    for amps in 6..12 {
        bus.emit(limit_event(amps));
    }
    assert!(stream.next().await.unwrap().is_err());
}

#[test]
fn events_serialize_with_type_tag() {
    let json = serde_json::to_value(limit_event(9)).unwrap();
    assert_eq!(json["type"], "limit_changed");
    assert_eq!(json["reason"], "RISK_LIMIT");
    assert_eq!(json["phase"], "L1");
    assert_eq!(json["new_limit"], 9);

    let back: BalancerEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back.as_limit_change().unwrap().previous_limit, 16);
}
