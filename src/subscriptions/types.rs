//! Subscription types for timeline change notifications.

use crate::timeline::TimelineView;
use crate::types::{ChapterId, SyncNumber};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 256
    pub buffer_size: usize,

    /// Send a `View` event with the current state before `CaughtUp`.
    pub send_initial_view: bool,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            send_initial_view: false,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Which classes of events a subscriber receives.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Chapter and sync selection changes.
    pub include_selection: bool,

    /// Chapter list, snapshot list and canon replacements, resets, loads.
    pub include_data: bool,

    /// Loading and syncing flags.
    pub include_flags: bool,
}

impl SubscriptionFilter {
    pub fn selection() -> Self {
        Self {
            include_selection: true,
            ..Default::default()
        }
    }

    pub fn data() -> Self {
        Self {
            include_data: true,
            ..Default::default()
        }
    }

    pub fn flags() -> Self {
        Self {
            include_flags: true,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            include_selection: true,
            include_data: true,
            include_flags: true,
        }
    }

    pub(crate) fn accepts(&self, class: EventClass) -> bool {
        match class {
            EventClass::Selection => self.include_selection,
            EventClass::Data => self.include_data,
            EventClass::Flags => self.include_flags,
            EventClass::Control => true,
        }
    }
}

/// Coarse grouping used for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventClass {
    Selection,
    Data,
    Flags,
    Control,
}

/// Events emitted by the timeline store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    // --- Data Events ---
    ChaptersChanged {
        count: usize,
    },

    SnapshotsChanged {
        count: usize,
    },

    CanonChanged {
        version: Option<u64>,
    },

    /// A load result was written into the store.
    LoadApplied {
        generation: u64,
    },

    /// A load result arrived after a newer load started and was dropped.
    LoadDiscarded {
        generation: u64,
    },

    /// Every field went back to its initial value.
    Reset,

    // --- Selection Events ---
    ChapterSelected {
        chapter_id: Option<ChapterId>,
        sync_number: Option<SyncNumber>,
    },

    /// A sync position was selected; `found` tells whether a snapshot matched.
    SyncSelected {
        sync_number: Option<SyncNumber>,
        viewing_snapshot: bool,
        found: bool,
    },

    // --- Flag Events ---
    LoadingChanged {
        is_loading: bool,
    },

    SyncingChanged {
        is_syncing: bool,
    },

    // --- Lifecycle Events ---
    /// Current state at subscription time.
    View {
        view: Box<TimelineView>,
    },

    /// Subscription is now live.
    CaughtUp,

    /// Subscription was dropped.
    Dropped {
        reason: DropReason,
    },
}

impl TimelineEvent {
    pub fn class(&self) -> EventClass {
        match self {
            TimelineEvent::ChaptersChanged { .. }
            | TimelineEvent::SnapshotsChanged { .. }
            | TimelineEvent::CanonChanged { .. }
            | TimelineEvent::LoadApplied { .. }
            | TimelineEvent::LoadDiscarded { .. }
            | TimelineEvent::Reset => EventClass::Data,
            TimelineEvent::ChapterSelected { .. } | TimelineEvent::SyncSelected { .. } => {
                EventClass::Selection
            }
            TimelineEvent::LoadingChanged { .. } | TimelineEvent::SyncingChanged { .. } => {
                EventClass::Flags
            }
            TimelineEvent::View { .. } | TimelineEvent::CaughtUp | TimelineEvent::Dropped { .. } => {
                EventClass::Control
            }
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Store was closed with its session.
    Closed,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<TimelineEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<TimelineEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<TimelineEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<TimelineEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<TimelineEvent> {
        self.receiver.try_iter().collect()
    }
}
