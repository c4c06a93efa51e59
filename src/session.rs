//! One open project: a timeline store plus the backend that feeds it.

use crate::backend::ProjectBackend;
use crate::error::Result;
use crate::sync::{ChapterSync, SyncOutcome};
use crate::timeline::{LoadedTimeline, TimelineConfig, TimelineStore};
use crate::types::{ChapterId, ElementEvent, ProjectId, SyncNumber};
use std::sync::Arc;

/// Context object for one project session.
///
/// Created when a project is opened and closed when the user navigates
/// away. Components that need timeline state get the store from here
/// instead of reaching for a global.
pub struct Session {
    project: ProjectId,
    backend: Arc<dyn ProjectBackend>,
    store: Arc<TimelineStore>,
}

impl Session {
    /// Open a session with a fresh, empty store.
    pub fn open(project: ProjectId, backend: Arc<dyn ProjectBackend>, config: TimelineConfig) -> Self {
        tracing::debug!(project = %project, "opening session");
        Self {
            project,
            backend,
            store: Arc::new(TimelineStore::with_config(config)),
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn store(&self) -> &Arc<TimelineStore> {
        &self.store
    }

    /// Fetch chapters, snapshots and canon and load them into the store.
    ///
    /// Returns `Ok(false)` when a newer load finished first and this result
    /// was dropped. On error the store keeps its previous data.
    pub fn load(&self) -> Result<bool> {
        let ticket = self.store.begin_load();
        match self.fetch() {
            Ok(loaded) => Ok(self.store.finish_load(ticket, loaded)),
            Err(e) => {
                tracing::warn!(project = %self.project, error = %e, "timeline load failed");
                self.store.abandon_load(ticket);
                Err(e)
            }
        }
    }

    pub fn select_chapter(&self, chapter: Option<ChapterId>) {
        self.store.set_current_chapter(chapter);
    }

    pub fn select_sync(&self, sync_number: Option<SyncNumber>) {
        self.store.set_current_sync(sync_number);
    }

    /// Run a chapter sync, then reload so the new snapshot and canon show up.
    ///
    /// The syncing flag is cleared whether or not the sync succeeds.
    pub fn sync_chapter(&self, chapter: &ChapterId) -> Result<SyncOutcome> {
        self.store.set_is_syncing(true);
        let outcome = ChapterSync::new(self.backend.as_ref()).run(&self.project, chapter);
        let result = match outcome {
            Ok(outcome) => self.load().map(|_| outcome),
            Err(e) => {
                tracing::warn!(
                    project = %self.project,
                    chapter = %chapter,
                    error = %e,
                    "chapter sync failed"
                );
                Err(e)
            }
        };
        self.store.set_is_syncing(false);
        result
    }

    /// Element timeline of the project, oldest first.
    pub fn element_history(&self) -> Result<Vec<ElementEvent>> {
        self.backend.list_element_events(&self.project)
    }

    /// Reset the store and drop its subscribers.
    pub fn close(self) {
        tracing::debug!(project = %self.project, "closing session");
        self.store.reset();
        self.store.close_subscriptions();
    }

    fn fetch(&self) -> Result<LoadedTimeline> {
        Ok(LoadedTimeline {
            chapters: self.backend.list_chapters(&self.project)?,
            snapshots: self.backend.list_snapshots(&self.project)?,
            canon_state: self.backend.get_canon_state(&self.project)?,
        })
    }
}
