//! Integration tests for the observer session relay.
//!
//! Sessions are driven directly over mpsc channels, the same way both
//! gateways drive them.

#![cfg(unix)]

use std::sync::Arc;

use process_relay::gateway::session::Session;
use process_relay::models::message::{ClientRequest, NoticeLevel, ServerMessage};
use process_relay::models::process::LifecycleEvent;
use process_relay::supervisor::{EventBus, ProcessRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{assert_silent, command, next_message, sleeping_registry, WAIT};

struct Observer {
    requests: mpsc::Sender<ClientRequest>,
    messages: mpsc::Receiver<ServerMessage>,
    task: JoinHandle<()>,
}

fn connect(registry: &Arc<ProcessRegistry>, cancel: &CancellationToken) -> Observer {
    let session = Session::open(Arc::clone(registry));
    let (requests, in_rx) = mpsc::channel(16);
    let (out_tx, messages) = mpsc::channel(16);
    let task = tokio::spawn(session.run(in_rx, out_tx, cancel.clone()));
    Observer {
        requests,
        messages,
        task,
    }
}

/// Read messages until the direct start reply and return its pid. Broadcasts
/// for other observers' starts may arrive first.
async fn accepted_pid(observer: &mut Observer) -> u32 {
    loop {
        match next_message(&mut observer.messages).await {
            ServerMessage::StartAccepted { pid } => return pid,
            ServerMessage::ProcessStarted { .. } => {}
            other => panic!("unexpected message before start-accepted: {other:?}"),
        }
    }
}

#[tokio::test]
async fn start_replies_to_requester_and_broadcasts_to_everyone() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let mut requester = connect(&registry, &cancel);
    let mut bystander = connect(&registry, &cancel);

    requester
        .requests
        .send(ClientRequest::StartProcess)
        .await
        .expect("send start");

    let ServerMessage::StartAccepted { pid } = next_message(&mut requester.messages).await else {
        panic!("requester expected start-accepted");
    };
    assert_eq!(
        next_message(&mut requester.messages).await,
        ServerMessage::ProcessStarted { pid }
    );
    assert_eq!(
        next_message(&mut bystander.messages).await,
        ServerMessage::ProcessStarted { pid }
    );
    assert!(registry.contains(pid).await);

    cancel.cancel();
    registry.shutdown(WAIT).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_each_report_their_own_pid() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let mut first = connect(&registry, &cancel);
    let mut second = connect(&registry, &cancel);

    let (a, b) = tokio::join!(
        first.requests.send(ClientRequest::StartProcess),
        second.requests.send(ClientRequest::StartProcess),
    );
    a.expect("send start");
    b.expect("send start");

    let first_pid = accepted_pid(&mut first).await;
    let second_pid = accepted_pid(&mut second).await;

    assert_ne!(first_pid, second_pid);
    assert_eq!(registry.list().await.len(), 2);
    assert!(registry.contains(first_pid).await);
    assert!(registry.contains(second_pid).await);

    cancel.cancel();
    registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn terminate_is_broadcast_with_readable_message() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let mut requester = connect(&registry, &cancel);
    let mut bystander = connect(&registry, &cancel);

    let pid = registry.start().await.expect("start");
    assert_eq!(
        next_message(&mut requester.messages).await,
        ServerMessage::ProcessStarted { pid }
    );
    assert_eq!(
        next_message(&mut bystander.messages).await,
        ServerMessage::ProcessStarted { pid }
    );

    requester
        .requests
        .send(ClientRequest::TerminateProcess { pid })
        .await
        .expect("send terminate");

    for observer in [&mut requester, &mut bystander] {
        let ServerMessage::ProcessTerminated {
            pid: got,
            signal,
            message,
            ..
        } = next_message(&mut observer.messages).await
        else {
            panic!("expected process-terminated");
        };
        assert_eq!(got, pid);
        assert_eq!(signal.as_deref(), Some("SIGTERM"));
        assert!(message.contains(&pid.to_string()));
        assert!(message.contains("Terminated"));
    }
    assert!(!registry.contains(pid).await);

    cancel.cancel();
}

#[tokio::test]
async fn unknown_terminate_notifies_requester_only_and_keeps_connection() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let mut requester = connect(&registry, &cancel);
    let mut bystander = connect(&registry, &cancel);

    requester
        .requests
        .send(ClientRequest::TerminateProcess { pid: 999_999 })
        .await
        .expect("send terminate");

    let ServerMessage::Notice { level, message } = next_message(&mut requester.messages).await
    else {
        panic!("expected notice");
    };
    assert_eq!(level, NoticeLevel::Warning);
    assert!(message.contains("999999"));
    assert_silent(&mut bystander.messages).await;

    requester
        .requests
        .send(ClientRequest::ListProcesses)
        .await
        .expect("connection still open");
    assert_eq!(
        next_message(&mut requester.messages).await,
        ServerMessage::ProcessList { processes: vec![] }
    );

    cancel.cancel();
}

#[tokio::test]
async fn list_replies_to_requester_with_active_processes() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let mut observer = connect(&registry, &cancel);

    let pid = registry.start().await.expect("start");
    let _ = next_message(&mut observer.messages).await; // process-started

    observer
        .requests
        .send(ClientRequest::ListProcesses)
        .await
        .expect("send list");
    let ServerMessage::ProcessList { processes } = next_message(&mut observer.messages).await
    else {
        panic!("expected process-list");
    };
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].pid, pid);

    cancel.cancel();
    registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn spawn_failure_notifies_requester() {
    let registry = super::test_helpers::test_registry("/nonexistent/process-relay-test-binary", &[]);
    let cancel = CancellationToken::new();
    let mut observer = connect(&registry, &cancel);

    observer
        .requests
        .send(ClientRequest::StartProcess)
        .await
        .expect("send start");

    let ServerMessage::Notice { level, message } = next_message(&mut observer.messages).await
    else {
        panic!("expected notice");
    };
    assert_eq!(level, NoticeLevel::Error);
    assert!(message.starts_with("spawn:"));
    assert!(registry.is_empty().await);

    cancel.cancel();
}

#[tokio::test]
async fn disconnect_unsubscribes_and_leaves_processes_running() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let observer = connect(&registry, &cancel);
    assert_eq!(registry.bus().subscriber_count(), 1);

    let pid = registry.start().await.expect("start");

    let Observer {
        requests, task, ..
    } = observer;
    drop(requests);
    tokio::time::timeout(WAIT, task)
        .await
        .expect("session ended")
        .expect("session did not panic");

    assert_eq!(registry.bus().subscriber_count(), 0);
    assert!(registry.contains(pid).await, "processes outlive their session");

    registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn cancellation_ends_session() {
    let registry = sleeping_registry();
    let cancel = CancellationToken::new();
    let observer = connect(&registry, &cancel);

    cancel.cancel();
    tokio::time::timeout(WAIT, observer.task)
        .await
        .expect("session ended")
        .expect("session did not panic");
    assert_eq!(registry.bus().subscriber_count(), 0);
}

#[tokio::test]
async fn lagging_observer_is_told_events_were_dropped() {
    let registry = ProcessRegistry::new(command("sleep", &["30"]), EventBus::new(1));
    let cancel = CancellationToken::new();
    let session = Session::open(Arc::clone(&registry));
    let (_requests, in_rx) = mpsc::channel(1);
    let (out_tx, mut messages) = mpsc::channel(1);
    let task = tokio::spawn(session.run(in_rx, out_tx, cancel.clone()));

    // The single-threaded test runtime does not poll the session until the
    // next await, so all of these land while it is stalled.
    for pid in 1..=8 {
        registry.bus().publish(LifecycleEvent::ProcessStarted { pid });
    }

    let ServerMessage::Notice { level, message } = next_message(&mut messages).await else {
        panic!("expected a lag notice first");
    };
    assert_eq!(level, NoticeLevel::Warning);
    assert!(message.starts_with("7 lifecycle events were dropped"), "{message}");
    assert_eq!(
        next_message(&mut messages).await,
        ServerMessage::ProcessStarted { pid: 8 }
    );

    cancel.cancel();
    tokio::time::timeout(WAIT, task)
        .await
        .expect("session ended")
        .expect("session did not panic");
}
