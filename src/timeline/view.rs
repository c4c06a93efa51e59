//! Timeline state and its transitions.

use super::queries;
use crate::subscriptions::TimelineEvent;
use crate::types::{CanonState, ChapterId, ChapterRef, Snapshot, SyncNumber};
use serde::{Deserialize, Serialize};

/// Every field of the timeline store.
///
/// `TimelineStore` keeps one of these behind its lock and hands out clones;
/// `Default` is the initial, unselected state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineView {
    pub chapters: Vec<ChapterRef>,
    pub snapshots: Vec<Snapshot>,
    pub canon_state: Option<CanonState>,
    pub current_chapter_id: Option<ChapterId>,
    pub current_sync_number: Option<SyncNumber>,
    pub is_viewing_snapshot: bool,
    pub active_snapshot: Option<Snapshot>,
    pub is_loading: bool,
    pub is_syncing: bool,
}

impl TimelineView {
    pub fn snapshots_for_chapter(&self, chapter_id: &ChapterId) -> Vec<Snapshot> {
        queries::snapshots_for_chapter(&self.snapshots, chapter_id)
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        queries::latest_snapshot(&self.snapshots)
    }

    pub fn current_chapter(&self) -> Option<&ChapterRef> {
        let id = self.current_chapter_id.as_ref()?;
        self.chapters.iter().find(|c| &c.id == id)
    }

    pub(crate) fn replace_chapters(&mut self, chapters: Vec<ChapterRef>) -> TimelineEvent {
        self.chapters = chapters;
        TimelineEvent::ChaptersChanged {
            count: self.chapters.len(),
        }
    }

    /// Replace the snapshot list. While a snapshot is being viewed, the
    /// active snapshot is looked up again in the new list.
    pub(crate) fn replace_snapshots(&mut self, snapshots: Vec<Snapshot>) -> TimelineEvent {
        self.snapshots = snapshots;
        if self.is_viewing_snapshot {
            self.active_snapshot = self.resolve_active();
        }
        TimelineEvent::SnapshotsChanged {
            count: self.snapshots.len(),
        }
    }

    pub(crate) fn replace_canon(&mut self, canon: Option<CanonState>) -> TimelineEvent {
        if let (Some(old), Some(new)) = (&self.canon_state, &canon) {
            if new.project_id == old.project_id && new.version < old.version {
                tracing::warn!(
                    project = %new.project_id,
                    cached = old.version,
                    incoming = new.version,
                    "canon state version went backwards"
                );
            }
        }
        self.canon_state = canon;
        TimelineEvent::CanonChanged {
            version: self.canon_state.as_ref().map(|c| c.version),
        }
    }

    pub(crate) fn set_loading(&mut self, is_loading: bool) -> TimelineEvent {
        self.is_loading = is_loading;
        TimelineEvent::LoadingChanged { is_loading }
    }

    pub(crate) fn set_syncing(&mut self, is_syncing: bool) -> TimelineEvent {
        self.is_syncing = is_syncing;
        TimelineEvent::SyncingChanged { is_syncing }
    }

    /// Select a chapter and return to the live view at its latest sync.
    pub(crate) fn select_chapter(&mut self, chapter_id: Option<ChapterId>) -> TimelineEvent {
        self.current_sync_number = chapter_id
            .as_ref()
            .and_then(|id| queries::latest_sync_for_chapter(&self.snapshots, id));
        self.current_chapter_id = chapter_id;
        self.is_viewing_snapshot = false;
        self.active_snapshot = None;
        TimelineEvent::ChapterSelected {
            chapter_id: self.current_chapter_id.clone(),
            sync_number: self.current_sync_number,
        }
    }

    /// Select a sync position of the current chapter.
    ///
    /// `None` leaves snapshot viewing and goes back to the live position.
    /// `Some(n)` enters snapshot viewing even when nothing matches; the
    /// caller checks `active_snapshot`.
    pub(crate) fn select_sync(&mut self, sync_number: Option<SyncNumber>) -> TimelineEvent {
        match sync_number {
            None => {
                self.is_viewing_snapshot = false;
                self.active_snapshot = None;
                self.current_sync_number = self.live_sync_number();
            }
            Some(n) => {
                self.current_sync_number = Some(n);
                self.is_viewing_snapshot = true;
                self.active_snapshot = self.resolve_active();
            }
        }
        TimelineEvent::SyncSelected {
            sync_number: self.current_sync_number,
            viewing_snapshot: self.is_viewing_snapshot,
            found: self.active_snapshot.is_some(),
        }
    }

    /// Move the live position to the current chapter's latest sync. Does
    /// nothing while a historical snapshot is being viewed.
    pub(crate) fn follow_latest(&mut self) {
        if !self.is_viewing_snapshot {
            self.current_sync_number = self.live_sync_number();
        }
    }

    fn live_sync_number(&self) -> Option<SyncNumber> {
        self.current_chapter_id
            .as_ref()
            .and_then(|id| queries::latest_sync_for_chapter(&self.snapshots, id))
    }

    fn resolve_active(&self) -> Option<Snapshot> {
        let sync_number = self.current_sync_number?;
        queries::find_snapshot(
            &self.snapshots,
            self.current_chapter_id.as_ref(),
            sync_number,
        )
        .cloned()
    }
}
