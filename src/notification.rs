//! Change notifications
//!
//! A store publishes every change into one [`NotificationHub`]. Consumers pull
//! from a [`Subscription`], optionally narrowed by pure predicates.
//!
//! The hub keeps a fixed-size ring of recent notifications. A subscriber that
//! falls more than that far behind skips the oldest ones and can find out how
//! many it lost through [`Subscription::take_missed`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Notifications retained for slow subscribers
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 4096;

/// Kind of change observed at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Created,
    Modified,
    Deleted,
    ChildrenChanged,
}

/// A single change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Rendered path, e.g. `/clusters/c1/failureDomain/d1`
    pub path: String,
    pub kind: NotificationType,
}

impl Notification {
    pub fn new(path: impl Into<String>, kind: NotificationType) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Predicate deciding whether a subscriber sees a notification
pub type NotificationFilter = Arc<dyn Fn(&Notification) -> bool + Send + Sync>;

/// Ordered stream of notifications for one subscriber.
///
/// Every notification published after the subscription was created is
/// observed once, unless the subscriber lags past the hub's capacity.
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    filters: Vec<NotificationFilter>,
    missed: u64,
}

impl Subscription {
    /// Only pass notifications accepted by `predicate` (in addition to any
    /// filters already attached).
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(predicate));
        self
    }

    /// Only pass notifications whose path starts with `prefix`
    pub fn under(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.filter(move |n| n.path.starts_with(&prefix))
    }

    fn accepts(&self, notification: &Notification) -> bool {
        self.filters.iter().all(|f| f(notification))
    }

    /// Wait for the next matching notification. `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if self.accepts(&notification) => return Some(notification),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, notifications dropped");
                    self.missed += skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching notification already queued, without waiting
    pub fn try_next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(notification) if self.accepts(&notification) => return Some(notification),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => self.missed += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Notifications lost to lag since the last call, filtered or not
    pub fn take_missed(&mut self) -> u64 {
        std::mem::take(&mut self.missed)
    }
}

/// Fan-out point shared by all subscribers of one store
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.sender.subscribe(),
            filters: Vec::new(),
            missed: 0,
        }
    }

    /// Deliver to every live subscriber
    pub fn publish(&self, notification: Notification) {
        // No subscribers is not an error.
        let _ = self.sender.send(notification);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
