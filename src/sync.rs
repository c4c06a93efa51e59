//! Chapter synchronization: snapshot the project's entities at the end of a
//! chapter edit, record what changed, and fold the result into canon.

use crate::backend::{ProjectBackend, SyncCommit};
use crate::error::{LoomError, Result};
use crate::timeline::{latest_snapshot, latest_sync_for_chapter, snapshots_for_chapter};
use crate::types::{
    CanonState, ChapterId, ElementChange, ElementEvent, ElementKind, NewSnapshot, ProjectId,
    Snapshot, SnapshotData, SnapshotEntity, SnapshotPayload, SyncNumber, Timestamp,
};
use std::collections::BTreeMap;

/// What a chapter sync produced.
#[derive(Clone, Debug)]
pub struct SyncOutcome {
    pub snapshot: Snapshot,
    pub canon: CanonState,
    pub changes: Vec<ElementEvent>,
}

/// How often a sync is recomputed after losing a race with another writer.
const MAX_ATTEMPTS: usize = 3;

/// Runs the sync workflow against a backend.
pub struct ChapterSync<'a> {
    backend: &'a dyn ProjectBackend,
}

impl<'a> ChapterSync<'a> {
    pub fn new(backend: &'a dyn ProjectBackend) -> Self {
        Self { backend }
    }

    /// Snapshot `chapter` and advance canon.
    ///
    /// Everything is computed first and written through one
    /// [`ProjectBackend::commit_sync`] call. When another sync of the same
    /// project commits in between (`SyncConflict` or `StaleCanon`), the sync
    /// is recomputed from fresh data, up to three attempts in total.
    pub fn run(&self, project: &ProjectId, chapter: &ChapterId) -> Result<SyncOutcome> {
        let mut attempt = 1;
        loop {
            match self.attempt(project, chapter) {
                Err(e @ (LoomError::SyncConflict { .. } | LoomError::StaleCanon { .. }))
                    if attempt < MAX_ATTEMPTS =>
                {
                    tracing::debug!(
                        project = %project,
                        chapter = %chapter,
                        attempt,
                        error = %e,
                        "chapter sync raced another writer, retrying"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn attempt(&self, project: &ProjectId, chapter: &ChapterId) -> Result<SyncOutcome> {
        let chapters = self.backend.list_chapters(project)?;
        let chapter_ref = chapters
            .iter()
            .find(|c| &c.id == chapter)
            .ok_or_else(|| LoomError::NotFound {
                kind: "chapter",
                id: chapter.to_string(),
            })?;

        let mut data = self.backend.load_entities(project)?;
        let text = self
            .backend
            .chapter_text(project, chapter)?
            .unwrap_or_default();
        data.stats = data.compute_stats(word_count(&text));

        let existing = self.backend.list_snapshots(project)?;
        let sync_number = latest_sync_for_chapter(&existing, chapter)
            .map(SyncNumber::next)
            .unwrap_or(SyncNumber(1));

        let previous = previous_data(&existing, chapter)?;
        let recorded_at = Timestamp::now();
        let events = diff_entities(&previous, &data)
            .into_iter()
            .map(|d| ElementEvent {
                project_id: project.clone(),
                chapter_id: Some(chapter.clone()),
                sync_number,
                kind: d.kind,
                element_id: d.element_id,
                change: d.change,
                name: d.name,
                recorded_at,
            })
            .collect::<Vec<_>>();

        let mut canon = self
            .backend
            .get_canon_state(project)?
            .unwrap_or_else(|| CanonState::new(project.clone()));
        canon.absorb(&data, Some(chapter_ref.number));

        let outcome = self.backend.commit_sync(SyncCommit {
            snapshot: NewSnapshot {
                project_id: project.clone(),
                chapter_id: Some(chapter.clone()),
                chapter_number: Some(chapter_ref.number),
                sync_number,
                snapshot_data: SnapshotPayload::from_data(&data)?,
            },
            events,
            canon,
        })?;

        tracing::debug!(
            project = %project,
            chapter = %chapter,
            sync = %sync_number,
            changes = outcome.changes.len(),
            canon_version = outcome.canon.version,
            "chapter synced"
        );

        Ok(outcome)
    }
}

/// Baseline for diffing: the chapter's latest snapshot, else the project's
/// most recent one, else nothing.
fn previous_data(existing: &[Snapshot], chapter: &ChapterId) -> Result<SnapshotData> {
    let in_chapter = snapshots_for_chapter(existing, chapter);
    let baseline = in_chapter.last().or_else(|| latest_snapshot(existing));
    match baseline {
        Some(snapshot) => snapshot.data(),
        None => Ok(SnapshotData::default()),
    }
}

/// One element-level difference between two payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementDiff {
    pub kind: ElementKind,
    pub element_id: String,
    pub change: ElementChange,
    /// Name after the change, or before it for removals.
    pub name: String,
}

/// Element-level changes between two payloads, ordered by kind then id.
pub fn diff_entities(before: &SnapshotData, after: &SnapshotData) -> Vec<ElementDiff> {
    let index = |data: &SnapshotData| -> BTreeMap<(ElementKind, String), SnapshotEntity> {
        data.entities()
            .into_iter()
            .filter_map(|entity| {
                let (kind, id) = entity.element_key()?;
                let key = (kind, id.to_string());
                Some((key, entity))
            })
            .collect()
    };

    let old = index(before);
    let new = index(after);
    let mut changes = Vec::new();

    let diff = |(kind, id): &(ElementKind, String), change, entity: &SnapshotEntity| ElementDiff {
        kind: *kind,
        element_id: id.clone(),
        change,
        name: entity.display_name(),
    };

    for (key, entity) in &new {
        match old.get(key) {
            None => changes.push(diff(key, ElementChange::Created, entity)),
            Some(previous) if previous != entity => {
                changes.push(diff(key, ElementChange::Updated, entity))
            }
            Some(_) => {}
        }
    }
    for (key, entity) in &old {
        if !new.contains_key(key) {
            changes.push(diff(key, ElementChange::Removed, entity));
        }
    }

    changes.sort_by(|a, b| (a.kind, &a.element_id).cmp(&(b.kind, &b.element_id)));
    changes
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
