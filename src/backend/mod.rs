//! Project data backend.
//!
//! The timeline never talks to storage directly. Sessions and the sync
//! workflow go through [`ProjectBackend`], which mirrors the hosted tables
//! of a story project: chapters, the current entity set, snapshots, the
//! canon record and the append-only element timeline.

mod element_log;
mod memory;

pub use element_log::ElementLog;
pub use memory::{ChapterRecord, MemoryBackend};

use crate::error::Result;
use crate::sync::SyncOutcome;
use crate::types::{
    CanonState, ChapterId, ChapterRef, ElementEvent, NewSnapshot, ProjectId, Snapshot,
    SnapshotData,
};

/// Read/write access to one store of story projects.
///
/// Implementations must be safe to share between threads; every call is a
/// single request/response and may fail with a transport error.
pub trait ProjectBackend: Send + Sync {
    /// Chapter index of a project, in chapter order.
    fn list_chapters(&self, project: &ProjectId) -> Result<Vec<ChapterRef>>;

    /// Every snapshot of a project, in insertion order.
    fn list_snapshots(&self, project: &ProjectId) -> Result<Vec<Snapshot>>;

    fn get_canon_state(&self, project: &ProjectId) -> Result<Option<CanonState>>;

    /// Current characters, lore, outline and story map of a project.
    fn load_entities(&self, project: &ProjectId) -> Result<SnapshotData>;

    /// Prose of a chapter, `None` if the chapter does not exist.
    fn chapter_text(&self, project: &ProjectId, chapter: &ChapterId) -> Result<Option<String>>;

    /// Store a snapshot; the backend assigns its id and creation time.
    fn insert_snapshot(&self, input: NewSnapshot) -> Result<Snapshot>;

    /// Replace the project's canon. The stored version must be lower than
    /// the incoming one.
    fn upsert_canon_state(&self, canon: CanonState) -> Result<CanonState>;

    fn append_element_events(&self, events: &[ElementEvent]) -> Result<()>;

    fn list_element_events(&self, project: &ProjectId) -> Result<Vec<ElementEvent>>;

    /// Record a finished chapter sync: its element events, the new canon
    /// and the snapshot.
    ///
    /// The default writes the snapshot last. A failure in an earlier step
    /// leaves the previous snapshot as the diff baseline, so a retry records
    /// the same changes again (possibly twice) instead of losing them.
    /// Backends that can write all three at once should override this and
    /// reject a `(chapter, sync number)` pair that already exists.
    fn commit_sync(&self, commit: SyncCommit) -> Result<SyncOutcome> {
        self.append_element_events(&commit.events)?;
        let canon = self.upsert_canon_state(commit.canon)?;
        let snapshot = self.insert_snapshot(commit.snapshot)?;
        Ok(SyncOutcome {
            snapshot,
            canon,
            changes: commit.events,
        })
    }
}

/// Everything one chapter sync writes.
#[derive(Clone, Debug)]
pub struct SyncCommit {
    pub snapshot: NewSnapshot,
    pub events: Vec<ElementEvent>,
    pub canon: CanonState,
}
