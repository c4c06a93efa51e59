//! The timeline store: shared, subscribable view state.

use super::view::TimelineView;
use super::queries;
use crate::error::Result;
use crate::subscriptions::{
    DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
    TimelineEvent,
};
use crate::types::{CanonState, ChapterId, ChapterRef, Snapshot, SyncNumber};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct TimelineConfig {
    /// Drop load results whose ticket is no longer the newest.
    /// With `false`, loads are last-write-wins like the plain setters.
    pub discard_stale_loads: bool,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            discard_stale_loads: true,
        }
    }
}

/// Proof that a load was started; carries its generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Everything a load fetches from the backend.
#[derive(Clone, Debug, Default)]
pub struct LoadedTimeline {
    pub chapters: Vec<ChapterRef>,
    pub snapshots: Vec<Snapshot>,
    pub canon_state: Option<CanonState>,
}

/// Client-side view state for time travel across chapter snapshots.
///
/// One instance per open project session. Every mutation holds the state
/// lock for the whole update and publishes its events before releasing it,
/// so subscribers observe changes in mutation order.
pub struct TimelineStore {
    config: TimelineConfig,

    state: RwLock<TimelineView>,

    subscriptions: SubscriptionManager,

    /// Generation of the newest load; bumped by `begin_load` and `reset`.
    generation: AtomicU64,
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::with_config(TimelineConfig::default())
    }

    pub fn with_config(config: TimelineConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TimelineView::default()),
            subscriptions: SubscriptionManager::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    // --- Reads ---

    /// Owned copy of every field, read under one lock.
    pub fn view(&self) -> TimelineView {
        self.state.read().clone()
    }

    /// Borrow the state for a read without cloning it.
    pub fn with_view<R>(&self, f: impl FnOnce(&TimelineView) -> R) -> R {
        f(&self.state.read())
    }

    pub fn chapters(&self) -> Vec<ChapterRef> {
        self.state.read().chapters.clone()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.read().snapshots.clone()
    }

    pub fn canon_state(&self) -> Option<CanonState> {
        self.state.read().canon_state.clone()
    }

    pub fn current_chapter_id(&self) -> Option<ChapterId> {
        self.state.read().current_chapter_id.clone()
    }

    pub fn current_sync_number(&self) -> Option<SyncNumber> {
        self.state.read().current_sync_number
    }

    pub fn is_viewing_snapshot(&self) -> bool {
        self.state.read().is_viewing_snapshot
    }

    pub fn active_snapshot(&self) -> Option<Snapshot> {
        self.state.read().active_snapshot.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    pub fn is_syncing(&self) -> bool {
        self.state.read().is_syncing
    }

    /// Snapshots of a chapter, ascending by sync number.
    pub fn snapshots_for_chapter(&self, chapter_id: &ChapterId) -> Vec<Snapshot> {
        queries::snapshots_for_chapter(&self.state.read().snapshots, chapter_id)
    }

    /// Most recently created snapshot of the project.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        queries::latest_snapshot(&self.state.read().snapshots).cloned()
    }

    // --- Setters ---

    pub fn set_chapters(&self, chapters: Vec<ChapterRef>) {
        self.mutate(|s| vec![s.replace_chapters(chapters)]);
    }

    pub fn set_snapshots(&self, snapshots: Vec<Snapshot>) {
        self.mutate(|s| vec![s.replace_snapshots(snapshots)]);
    }

    pub fn set_canon_state(&self, canon: Option<CanonState>) {
        self.mutate(|s| vec![s.replace_canon(canon)]);
    }

    pub fn set_is_loading(&self, is_loading: bool) {
        self.mutate(|s| vec![s.set_loading(is_loading)]);
    }

    pub fn set_is_syncing(&self, is_syncing: bool) {
        self.mutate(|s| vec![s.set_syncing(is_syncing)]);
    }

    /// Select a chapter (or none). Always returns to the live view.
    pub fn set_current_chapter(&self, chapter_id: Option<ChapterId>) {
        self.mutate(|s| vec![s.select_chapter(chapter_id)]);
    }

    /// Select a sync position of the current chapter, or leave snapshot
    /// viewing with `None`.
    pub fn set_current_sync(&self, sync_number: Option<SyncNumber>) {
        self.mutate(|s| vec![s.select_sync(sync_number)]);
    }

    /// Restore every field to its initial value. Loads started before the
    /// reset can no longer be applied.
    pub fn reset(&self) {
        let mut state = self.state.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *state = TimelineView::default();
        self.subscriptions.broadcast(TimelineEvent::Reset);
    }

    // --- Load sequencing ---

    /// Start a load: marks the store loading and supersedes older tickets.
    pub fn begin_load(&self) -> LoadTicket {
        let mut state = self.state.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let event = state.set_loading(true);
        self.subscriptions.broadcast(event);
        LoadTicket { generation }
    }

    /// Generation of the newest load ticket.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Apply a load result. Returns false when the result was discarded
    /// because a newer load (or a reset) happened since `ticket` was issued.
    ///
    /// An applied load also moves the live position to the selected
    /// chapter's latest sync.
    pub fn finish_load(&self, ticket: LoadTicket, loaded: LoadedTimeline) -> bool {
        let mut state = self.state.write();

        if self.is_stale(ticket) {
            tracing::debug!(
                generation = ticket.generation,
                newest = self.current_generation(),
                "discarding stale timeline load"
            );
            self.subscriptions.broadcast(TimelineEvent::LoadDiscarded {
                generation: ticket.generation,
            });
            return false;
        }

        let events = vec![
            state.replace_chapters(loaded.chapters),
            state.replace_snapshots(loaded.snapshots),
            state.replace_canon(loaded.canon_state),
            state.set_loading(false),
            TimelineEvent::LoadApplied {
                generation: ticket.generation,
            },
        ];
        state.follow_latest();

        for event in events {
            self.subscriptions.broadcast(event);
        }
        true
    }

    /// Give up on a load without touching the data. Clears the loading flag
    /// if the ticket is still the newest.
    pub fn abandon_load(&self, ticket: LoadTicket) -> bool {
        let mut state = self.state.write();
        if ticket.generation != self.current_generation() {
            return false;
        }
        let event = state.set_loading(false);
        self.subscriptions.broadcast(event);
        true
    }

    fn is_stale(&self, ticket: LoadTicket) -> bool {
        self.config.discard_stale_loads && ticket.generation != self.current_generation()
    }

    // --- Subscriptions ---

    /// Subscribe to store events. With `send_initial_view` the first event is
    /// a `View` of the current state, always followed by `CaughtUp`.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle> {
        // Holding the read lock keeps mutations out until the subscriber is live.
        let state = self.state.read();
        let send_view = config.send_initial_view;
        let handle = self.subscriptions.subscribe(config);

        if send_view {
            let view = TimelineEvent::View {
                view: Box::new(state.clone()),
            };
            if !self.subscriptions.send_to(handle.id, view) {
                self.subscriptions.unsubscribe(handle.id);
                return Err(crate::error::LoomError::SubscriptionDropped);
            }
        }

        self.subscriptions.mark_caught_up(handle.id)?;
        Ok(handle)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    /// Drop every subscriber; used when the owning session closes.
    pub fn close_subscriptions(&self) {
        self.subscriptions.close_all(DropReason::Closed);
    }

    fn mutate(&self, f: impl FnOnce(&mut TimelineView) -> Vec<TimelineEvent>) {
        let mut state = self.state.write();
        for event in f(&mut state) {
            self.subscriptions.broadcast(event);
        }
    }
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self::new()
    }
}
