//! Lifecycle event fan-out.
//!
//! Backed by a tokio [`broadcast`] channel: every subscription owns an
//! independent bounded queue, `publish` never waits on consumers, and a
//! subscriber that falls behind loses its oldest events instead of stalling
//! the registry or other subscribers.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::models::process::LifecycleEvent;

/// Broadcaster delivering lifecycle events to every active subscription.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on. Past events are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Deliver `event` to every current subscription without blocking.
    ///
    /// Returns the number of subscriptions the event was queued for.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                debug!(pid = event.pid(), "no subscribers for lifecycle event");
                0
            }
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Outcome of reading from a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Next event in publish order.
    Event(LifecycleEvent),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
}

/// One observer's view of the bus. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<LifecycleEvent>,
}

impl Subscription {
    /// Wait for the next delivery. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscriber lagged; oldest events dropped");
                Some(Delivery::Lagged(skipped))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Take the next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(TryRecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Stop delivery. Safe to call while a publish is in flight.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
