//! Integration tests for best-effort termination at shutdown.

#![cfg(unix)]

use std::time::Duration;

use process_relay::models::process::LifecycleEvent;

use super::test_helpers::{next_event, sleeping_registry, stubborn_registry, WAIT};

#[tokio::test]
async fn shutdown_terminates_every_active_process() {
    let registry = sleeping_registry();
    let mut sub = registry.bus().subscribe();
    for _ in 0..3 {
        registry.start().await.expect("start");
    }

    let remaining = registry.shutdown(WAIT).await;

    assert_eq!(remaining, 0);
    assert!(registry.is_empty().await);

    let mut terminated = 0;
    for _ in 0..6 {
        if matches!(next_event(&mut sub).await, LifecycleEvent::ProcessTerminated { .. }) {
            terminated += 1;
        }
    }
    assert_eq!(terminated, 3);
}

#[tokio::test]
async fn shutdown_with_empty_table_returns_immediately() {
    let registry = sleeping_registry();
    let remaining = tokio::time::timeout(Duration::from_secs(1), registry.shutdown(WAIT))
        .await
        .expect("no waiting on an empty table");
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn shutdown_gives_up_after_grace_period() {
    let registry = stubborn_registry();
    let pid = registry.start().await.expect("start");

    let remaining = registry.shutdown(Duration::from_millis(200)).await;

    assert_eq!(remaining, 1);
    assert!(registry.contains(pid).await);
}
