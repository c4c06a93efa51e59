//! Subscription manager for broadcasting timeline events.

use crate::error::{LoomError, Result};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId, TimelineEvent,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<TimelineEvent>,
    /// Whether the initial view has been delivered.
    caught_up: bool,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: TimelineEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    fn wants(&self, event: &TimelineEvent) -> bool {
        self.caught_up && self.config.filter.accepts(event.class())
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription.
    ///
    /// The subscription receives nothing from `broadcast` until
    /// `mark_caught_up` is called for it.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        let subscription = Subscription {
            config,
            sender,
            caught_up: false,
        };

        self.subscriptions.write().insert(id, subscription);

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.remove(id, DropReason::Unsubscribed);
    }

    /// Drop every subscription with the given reason.
    pub fn close_all(&self, reason: DropReason) {
        let mut subs = self.subscriptions.write();
        for (_, sub) in subs.drain() {
            let _ = sub.sender.try_send(TimelineEvent::Dropped {
                reason: reason.clone(),
            });
        }
    }

    /// Mark a subscription as live and send `CaughtUp`.
    pub fn mark_caught_up(&self, id: SubscriptionId) -> Result<()> {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.get_mut(&id) {
            sub.caught_up = true;
            if !sub.try_send(TimelineEvent::CaughtUp) {
                subs.remove(&id);
                return Err(LoomError::SubscriptionDropped);
            }
        }
        Ok(())
    }

    /// Config of a live subscription.
    pub fn get_config(&self, id: SubscriptionId) -> Option<SubscriptionConfig> {
        self.subscriptions.read().get(&id).map(|s| s.config.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Send an event directly to one subscription, ignoring its filter.
    /// Returns false if the subscription is gone or its buffer is full.
    pub fn send_to(&self, id: SubscriptionId, event: TimelineEvent) -> bool {
        let subs = self.subscriptions.read();
        match subs.get(&id) {
            Some(sub) => sub.try_send(event),
            None => false,
        }
    }

    /// Deliver an event to every matching subscription. Drops subscribers that
    /// fail to receive; never blocks.
    pub fn broadcast(&self, event: TimelineEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.wants(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        for id in to_remove {
            tracing::debug!(subscription = id.0, "dropping slow timeline subscriber");
            self.remove(id, DropReason::BufferOverflow);
        }
    }

    fn remove(&self, id: SubscriptionId, reason: DropReason) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            // Best effort: a full buffer cannot take the notice either.
            let _ = sub.sender.try_send(TimelineEvent::Dropped { reason });
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
