//! Change notification pub/sub.
//!
//! Thin fan-out layer between the reconciler and UI consumers. Events are
//! published after the synchronous snapshot commit, so a subscriber always
//! observes a snapshot at least as new as any event it processes. Several
//! mutations between two render passes may coalesce into what looks like a
//! single refresh to the consumer; the event carries no payload diff.

use crate::model::TaskId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Type-safe event types published after settled mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The task collection changed in some way; consumers should re-read.
    TasksChanged,
    /// A timer was started or stopped on the given task.
    TimerToggled(TaskId),
}

impl ChangeEvent {
    /// Returns the string representation of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TasksChanged => "tasksChanged",
            Self::TimerToggled(_) => "timerToggled",
        }
    }
}

/// Handle returned from [`ChangeNotifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Registry of change subscribers.
///
/// Callbacks run synchronously on the publishing call, in no guaranteed
/// order. The subscriber set is snapshotted before delivery, so a callback
/// may subscribe or unsubscribe freely; an unsubscribe during delivery
/// takes effect from the next publish. A callback must not mutate the
/// engine reentrantly.
#[derive(Default)]
pub struct ChangeNotifier {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked for every published event.
    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("notifier lock poisoned")
            .insert(id, Arc::new(callback));
        SubscriptionId(id)
    }

    /// Removes a previously registered callback. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("notifier lock poisoned")
            .remove(&id.0);
    }

    /// Delivers `event` to every subscriber registered at the time of the
    /// call. The registry lock is released before callbacks run.
    pub fn publish(&self, event: &ChangeEvent) {
        let callbacks: Vec<Subscriber> = self
            .subscribers
            .lock()
            .expect("notifier lock poisoned")
            .values()
            .map(Arc::clone)
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("notifier lock poisoned")
            .len()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
