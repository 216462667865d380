//! Unit tests for the log bus: eviction policy, replay-then-live
//! ordering, and fan-out to multiple subscribers.

use futures_util::StreamExt;

use courier::logbus::LogBus;
use courier::models::log::Severity;

#[test]
fn ring_never_retains_more_than_cap() {
    let bus = LogBus::new(5);
    for n in 0..9 {
        bus.info(format!("record {n}"));
    }

    let history = bus.history();
    assert_eq!(history.len(), 5);
    // Oldest evicted first: 0..=3 are gone.
    assert_eq!(history[0].text, "record 4");
    assert_eq!(history[4].text, "record 8");
}

#[tokio::test]
async fn late_joiner_replays_at_most_cap_then_lives() {
    let bus = LogBus::new(3);
    for n in 0..6 {
        bus.info(format!("old {n}"));
    }

    let mut stream = bus.subscribe();
    bus.info("live");

    assert_eq!(stream.next().await.unwrap().text, "old 3");
    assert_eq!(stream.next().await.unwrap().text, "old 4");
    assert_eq!(stream.next().await.unwrap().text, "old 5");
    assert_eq!(stream.next().await.unwrap().text, "live");
}

#[tokio::test]
async fn records_arrive_in_publish_order() {
    let bus = LogBus::new(100);
    let mut stream = bus.subscribe();

    for n in 0..20 {
        bus.info(format!("{n}"));
    }

    for n in 0..20 {
        assert_eq!(stream.next().await.unwrap().text, format!("{n}"));
    }
}

#[tokio::test]
async fn every_subscriber_gets_every_record() {
    let bus = LogBus::new(10);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.error("boom");

    let a = first.next().await.unwrap();
    let b = second.next().await.unwrap();
    assert_eq!(a.text, "boom");
    assert_eq!(b.text, "boom");
    assert_eq!(a.severity, Severity::Error);
}

#[tokio::test]
async fn subscriber_streams_end_when_bus_drops() {
    let bus = LogBus::new(10);
    let mut stream = bus.subscribe();
    bus.info("last words");
    drop(bus);

    assert_eq!(stream.next().await.unwrap().text, "last words");
    assert!(stream.next().await.is_none());
}

#[test]
fn subscriber_count_tracks_receivers() {
    let bus = LogBus::new(10);
    assert_eq!(bus.subscriber_count(), 0);
    let stream = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);
    drop(stream);
}
