//! Unit tests for lifecycle event fan-out.

use std::time::Duration;

use process_relay::models::process::{ExitInfo, LifecycleEvent};
use process_relay::supervisor::{Delivery, EventBus};

fn started(pid: u32) -> LifecycleEvent {
    LifecycleEvent::ProcessStarted { pid }
}

fn terminated(pid: u32) -> LifecycleEvent {
    LifecycleEvent::ProcessTerminated {
        pid,
        exit: ExitInfo {
            code: Some(0),
            signal: None,
        },
    }
}

#[tokio::test]
async fn every_subscriber_receives_each_event() {
    let bus = EventBus::new(8);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    assert_eq!(bus.publish(started(100)), 2);

    assert_eq!(first.recv().await, Some(Delivery::Event(started(100))));
    assert_eq!(second.recv().await, Some(Delivery::Event(started(100))));
}

#[tokio::test]
async fn events_arrive_in_publish_order() {
    let bus = EventBus::new(8);
    let mut sub = bus.subscribe();

    bus.publish(started(1));
    bus.publish(started(2));
    bus.publish(terminated(1));

    assert_eq!(sub.recv().await, Some(Delivery::Event(started(1))));
    assert_eq!(sub.recv().await, Some(Delivery::Event(started(2))));
    assert_eq!(sub.recv().await, Some(Delivery::Event(terminated(1))));
}

#[test]
fn publish_without_subscribers_is_harmless() {
    let bus = EventBus::new(4);
    assert_eq!(bus.publish(started(5)), 0);
}

#[test]
fn late_subscriber_sees_no_replay() {
    let bus = EventBus::new(4);
    let _early = bus.subscribe();
    bus.publish(started(1));
    bus.publish(terminated(1));

    let mut late = bus.subscribe();
    assert!(late.try_recv().is_none(), "past events must not be replayed");

    bus.publish(started(2));
    assert_eq!(late.try_recv(), Some(Delivery::Event(started(2))));
}

#[test]
fn slow_subscriber_lags_without_blocking_publish() {
    let bus = EventBus::new(2);
    let mut slow = bus.subscribe();
    let mut fast = bus.subscribe();

    for pid in 1..=5 {
        bus.publish(started(pid));
        assert_eq!(fast.try_recv(), Some(Delivery::Event(started(pid))));
    }

    // Oldest events were dropped for the slow subscriber only.
    assert_eq!(slow.try_recv(), Some(Delivery::Lagged(3)));
    assert_eq!(slow.try_recv(), Some(Delivery::Event(started(4))));
    assert_eq!(slow.try_recv(), Some(Delivery::Event(started(5))));
}

#[test]
fn unsubscribe_stops_delivery() {
    let bus = EventBus::new(4);
    let sub = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);

    sub.unsubscribe();
    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(bus.publish(started(9)), 0);
}

#[tokio::test]
async fn unsubscribe_during_publish_is_safe() {
    let bus = EventBus::new(64);
    let subs: Vec<_> = (0..8).map(|_| bus.subscribe()).collect();

    let publisher = {
        let bus = bus.clone();
        tokio::spawn(async move {
            for pid in 0..200 {
                bus.publish(started(pid));
                tokio::task::yield_now().await;
            }
        })
    };
    for sub in subs {
        sub.unsubscribe();
        tokio::task::yield_now().await;
    }

    tokio::time::timeout(Duration::from_secs(5), publisher)
        .await
        .expect("publisher finished")
        .expect("publisher did not panic");
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn recv_returns_none_once_bus_dropped() {
    let bus = EventBus::new(4);
    let mut sub = bus.subscribe();
    drop(bus);
    assert_eq!(sub.recv().await, None);
}
